pub mod api;
pub mod models;
pub mod service;

pub use models::{Invoice, MonthRevenue, RevenueGrowth, RevenueSummary};
pub use service::{BillingService, CreateSubscriptionInput};
