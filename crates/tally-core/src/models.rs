//! Domain models for Tally

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::normalize::normalize_merchant;

/// Closed set of categories a transaction can be assigned
///
/// Serialized (and stored) by display label, e.g. `"Meals & Entertainment"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "Income")]
    Income,
    #[serde(rename = "Transfer")]
    Transfer,
    #[serde(rename = "Advertising & Marketing")]
    AdvertisingMarketing,
    #[serde(rename = "Bank Fees")]
    BankFees,
    #[serde(rename = "Contractors")]
    Contractors,
    #[serde(rename = "Equipment")]
    Equipment,
    #[serde(rename = "Insurance")]
    Insurance,
    #[serde(rename = "Meals & Entertainment")]
    MealsEntertainment,
    #[serde(rename = "Office Supplies")]
    OfficeSupplies,
    #[serde(rename = "Payroll")]
    Payroll,
    #[serde(rename = "Professional Services")]
    ProfessionalServices,
    #[serde(rename = "Rent")]
    Rent,
    #[serde(rename = "Software & Subscriptions")]
    SoftwareSubscriptions,
    #[serde(rename = "Taxes & Licenses")]
    TaxesLicenses,
    #[serde(rename = "Travel")]
    Travel,
    #[serde(rename = "Utilities")]
    Utilities,
    #[serde(rename = "Vehicle & Fuel")]
    VehicleFuel,
    #[serde(rename = "Other")]
    Other,
}

impl Category {
    /// Display label (wire and storage form)
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "Income",
            Self::Transfer => "Transfer",
            Self::AdvertisingMarketing => "Advertising & Marketing",
            Self::BankFees => "Bank Fees",
            Self::Contractors => "Contractors",
            Self::Equipment => "Equipment",
            Self::Insurance => "Insurance",
            Self::MealsEntertainment => "Meals & Entertainment",
            Self::OfficeSupplies => "Office Supplies",
            Self::Payroll => "Payroll",
            Self::ProfessionalServices => "Professional Services",
            Self::Rent => "Rent",
            Self::SoftwareSubscriptions => "Software & Subscriptions",
            Self::TaxesLicenses => "Taxes & Licenses",
            Self::Travel => "Travel",
            Self::Utilities => "Utilities",
            Self::VehicleFuel => "Vehicle & Fuel",
            Self::Other => "Other",
        }
    }

    /// snake_case slug, accepted on input alongside the label
    pub fn slug(&self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Transfer => "transfer",
            Self::AdvertisingMarketing => "advertising_marketing",
            Self::BankFees => "bank_fees",
            Self::Contractors => "contractors",
            Self::Equipment => "equipment",
            Self::Insurance => "insurance",
            Self::MealsEntertainment => "meals_entertainment",
            Self::OfficeSupplies => "office_supplies",
            Self::Payroll => "payroll",
            Self::ProfessionalServices => "professional_services",
            Self::Rent => "rent",
            Self::SoftwareSubscriptions => "software_subscriptions",
            Self::TaxesLicenses => "taxes_licenses",
            Self::Travel => "travel",
            Self::Utilities => "utilities",
            Self::VehicleFuel => "vehicle_fuel",
            Self::Other => "other",
        }
    }

    /// Get all categories
    pub fn all() -> &'static [Category] {
        &[
            Self::Income,
            Self::Transfer,
            Self::AdvertisingMarketing,
            Self::BankFees,
            Self::Contractors,
            Self::Equipment,
            Self::Insurance,
            Self::MealsEntertainment,
            Self::OfficeSupplies,
            Self::Payroll,
            Self::ProfessionalServices,
            Self::Rent,
            Self::SoftwareSubscriptions,
            Self::TaxesLicenses,
            Self::Travel,
            Self::Utilities,
            Self::VehicleFuel,
            Self::Other,
        ]
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::all()
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(wanted) || c.slug().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("Unknown category: {}", s))
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which tier produced a categorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategorizationMethod {
    /// Resolved from the user's own earlier correction
    LearnedPattern,
    /// Matched the static rule table
    RuleBased,
    /// Classified by the AI backend
    AiFallback,
}

impl CategorizationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LearnedPattern => "learned_pattern",
            Self::RuleBased => "rule_based",
            Self::AiFallback => "ai_fallback",
        }
    }
}

impl std::str::FromStr for CategorizationMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "learned_pattern" => Ok(Self::LearnedPattern),
            "rule_based" => Ok(Self::RuleBased),
            "ai_fallback" => Ok(Self::AiFallback),
            _ => Err(format!("Unknown categorization method: {}", s)),
        }
    }
}

impl std::fmt::Display for CategorizationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A ledger transaction with its categorization fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub user_id: i64,
    pub date: NaiveDate,
    /// Negative = expense, positive = income
    pub amount: f64,
    pub description: String,
    pub merchant_name: Option<String>,
    /// None until the first categorization pass
    pub category: Option<Category>,
    /// None when no tier produced a result (default category)
    pub categorization_method: Option<CategorizationMethod>,
    pub confidence: Option<f64>,
    pub needs_review: bool,
    /// Hash for deduplication of re-delivered sync records
    pub import_hash: String,
    pub categorized_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// View of this transaction as categorized output, if it has been categorized
    pub fn categorized(&self) -> Option<CategorizedTransaction> {
        let category = self.category?;
        Some(CategorizedTransaction {
            id: self.id,
            user_id: self.user_id,
            date: self.date,
            amount: self.amount,
            description: self.description.clone(),
            merchant_name: self.merchant_name.clone(),
            merchant_token: normalize_merchant(&self.description),
            category,
            categorization_method: self.categorization_method,
            confidence: self.confidence.unwrap_or(0.0),
            needs_review: self.needs_review,
        })
    }
}

/// A raw transaction record from the ledger sync feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransaction {
    pub date: NaiveDate,
    pub description: String,
    pub amount: f64,
    #[serde(default)]
    pub merchant_name: Option<String>,
    /// Identifier assigned by the ledger, folded into the dedupe hash when present
    #[serde(default)]
    pub external_id: Option<String>,
}

/// Categorized transaction as exposed to the review/reporting side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorizedTransaction {
    pub id: i64,
    pub user_id: i64,
    pub date: NaiveDate,
    pub amount: f64,
    pub description: String,
    pub merchant_name: Option<String>,
    pub merchant_token: String,
    pub category: Category,
    pub categorization_method: Option<CategorizationMethod>,
    pub confidence: f64,
    pub needs_review: bool,
}

/// A user's correction remembered for a merchant token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedPattern {
    pub id: i64,
    pub user_id: i64,
    pub merchant_token: String,
    pub category: Category,
    /// Amount of the corrected transaction (informational only)
    pub amount: Option<f64>,
    pub corrected_at: DateTime<Utc>,
}

/// Status of a bulk re-categorization job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    /// Whether the job can still make progress
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-tier counters for a categorization pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierBreakdown {
    pub by_learned: i64,
    pub by_rule: i64,
    pub by_ai: i64,
    pub fallback_to_other: i64,
}

impl TierBreakdown {
    pub fn record(&mut self, method: Option<CategorizationMethod>) {
        match method {
            Some(CategorizationMethod::LearnedPattern) => self.by_learned += 1,
            Some(CategorizationMethod::RuleBased) => self.by_rule += 1,
            Some(CategorizationMethod::AiFallback) => self.by_ai += 1,
            None => self.fallback_to_other += 1,
        }
    }

    pub fn total(&self) -> i64 {
        self.by_learned + self.by_rule + self.by_ai + self.fallback_to_other
    }
}

/// A bulk re-categorization job (the handle returned to the review UI)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecategorizeJob {
    pub id: i64,
    pub user_id: i64,
    pub status: JobStatus,
    /// Last transaction id fully processed; the job resumes after it
    pub checkpoint_id: i64,
    pub processed: i64,
    pub total: i64,
    pub breakdown: TierBreakdown,
    pub cancel_requested: bool,
    /// A newer request asked the job to rewind to the first transaction
    pub restart_requested: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}
