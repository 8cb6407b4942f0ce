mod feedback;
mod interactions;
mod profiles;

pub use feedback::{FeedbackRepository, ServedRecommendation, StrategyCtrRow};
pub use interactions::InteractionRepository;
pub use profiles::{ProfileRepository, ProfileSettingsUpdate};
