pub mod event;
pub mod fare;
pub mod party;
pub mod safety;
pub mod session;
pub mod settings;
pub mod split;
pub mod trip;
