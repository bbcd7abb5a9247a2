pub mod geocode;
pub mod llm;
