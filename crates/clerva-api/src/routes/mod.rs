pub mod presence;
pub mod progression;
