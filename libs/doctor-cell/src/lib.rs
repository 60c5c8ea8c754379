pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::*;
pub use router::{doctor_routes, DoctorState};
pub use services::availability;
pub use services::DoctorService;
