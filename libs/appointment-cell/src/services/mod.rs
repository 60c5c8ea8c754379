pub mod booking;
pub mod lifecycle;
pub mod locks;

pub use booking::AppointmentBookingService;
pub use lifecycle::AppointmentLifecycleService;
pub use locks::{SlotGuard, SlotKey, SlotLocks};
