pub mod parsed;
pub mod profile;
