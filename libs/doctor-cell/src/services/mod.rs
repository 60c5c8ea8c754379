pub mod availability;
pub mod doctor;

pub use doctor::DoctorService;
