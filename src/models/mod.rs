pub mod allowance;
pub mod event;
pub mod reservation;
pub mod seat;
pub mod user;

pub use allowance::Allowance;
pub use event::Event;
pub use reservation::{LiveStatus, Reservation, ReservationStatus};
pub use seat::{Location, Seat};
pub use user::{Role, User};
