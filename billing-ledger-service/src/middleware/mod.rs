pub mod actor;
pub mod validated_json;

pub use actor::Actor;
pub use validated_json::ValidatedJson;
