//! New-user onboarding: the orchestrator, the collaborator seams it calls,
//! the event consumer that drives it, and the HTTP boundary.

pub mod blackout;
pub mod consumer;
pub mod model;
pub mod orchestrator;
pub mod routes;
pub mod services;

pub use blackout::BlackoutWindow;
pub use consumer::{EventPublisher, OnboardingConsumer, UserCreatedEvent};
pub use model::{ContentItem, PrivateProfile, UserEntity, Visibility};
pub use orchestrator::{OnboardingDeps, OnboardingOutcome, OnboardingReport, Orchestrator, Step};
pub use routes::{OnboardingRouteState, onboarding_routes};
pub use services::{
    LeagueService, NotificationService, PersonalizationService, TrendingService, UserDirectory,
};
