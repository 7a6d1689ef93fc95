pub mod flatten;
pub mod live;
pub mod positions;
pub mod reset;
pub mod scan;
pub mod token;
pub mod verify;
