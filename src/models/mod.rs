pub mod booking;
pub mod period;
pub mod principal;
pub mod service;
pub mod transaction;

pub use booking::{
    AttemptStatus, Booking, BookingState, CancelledBy, CateringSelection, PaymentAttempt,
    PaymentView, SelectedItem, TransitionError,
};
pub use period::{Period, PeriodSet};
pub use principal::{Principal, Role};
pub use service::{
    CateringPackage, MenuItem, MenuSection, PackageItem, SectionGroup, SectionItemKey, Service,
    ServiceCategory,
};
pub use transaction::{Transaction, TransactionStatus};
