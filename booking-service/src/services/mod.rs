pub mod admission;
pub mod distance;
pub mod gateway;
pub mod metrics;
pub mod notifications;
pub mod pending;
pub mod repository;
pub mod sms;
pub mod validation;

pub use admission::{BookingAdmissionService, BookingError, ConfirmationResult, PaymentStatusView};
pub use distance::{DistanceLookup, GoogleDirectionsClient, StaticDistanceLookup};
pub use gateway::{PaymentGateway, PhonepeClient, RazorpayClient};
pub use metrics::{get_metrics, init_metrics};
pub use notifications::NotificationDispatcher;
pub use pending::{InMemoryPendingStore, PendingTransactionStore, RedisPendingStore};
pub use repository::{FareStore, InMemoryFareStore, MongoFareStore};
pub use sms::{Fast2SmsProvider, MockSmsProvider, SmsProvider};
pub use validation::TripEligibilityValidator;
