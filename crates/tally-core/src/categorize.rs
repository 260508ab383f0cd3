//! Categorization orchestrator
//!
//! Sequences the tiers for each transaction and persists the outcome:
//! learned pattern (user corrections) → rule table → AI fallback → "Other".
//!
//! AI answers are cached per run, keyed by the cleaned description, so a
//! batch with many rows from the same merchant makes one call.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use tracing::{debug, warn};

use crate::ai::{AiFallback, AiVerdict};
use crate::db::{Database, TransactionInsertResult};
use crate::error::Result;
use crate::models::{
    CategorizationMethod, CategorizedTransaction, Category, NewTransaction, TierBreakdown,
    Transaction,
};
use crate::normalize::{clean_description, normalize_merchant};
use crate::policy::{ReviewPolicy, Verdict, LEARNED_CONFIDENCE};
use crate::rules::RuleTable;

/// Progress callback for categorization passes
/// Parameters: (current, total)
pub type ProgressCallback = Box<dyn Fn(i64, i64) + Send + Sync>;

/// Outcome of resolving one description (nothing persisted)
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub merchant_token: String,
    #[serde(flatten)]
    pub verdict: Verdict,
    /// Name of the matching rule when the rule tier decided
    pub rule: Option<String>,
    /// Whether the AI answer came from this run's cache
    pub ai_cached: bool,
}

/// Result of a categorization pass over many transactions
#[derive(Debug, Clone, Default, Serialize)]
pub struct CategorizeResult {
    pub processed: i64,
    #[serde(flatten)]
    pub breakdown: TierBreakdown,
    /// AI answers served from the run cache (included in `by_ai`)
    pub by_ai_cached: i64,
    pub needs_review: i64,
}

impl CategorizeResult {
    fn record(&mut self, resolution: &Resolution) {
        self.processed += 1;
        self.breakdown.record(resolution.verdict.method);
        if resolution.ai_cached {
            self.by_ai_cached += 1;
        }
        if resolution.verdict.needs_review {
            self.needs_review += 1;
        }
    }
}

/// Result of ingesting a batch of sync records
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestResult {
    pub inserted: i64,
    pub skipped: i64,
    /// Inserted rows whose categorization could not be persisted (left pending)
    pub failed: i64,
    pub categorized: Vec<CategorizedTransaction>,
}

/// Categorization engine with per-run AI caching
pub struct Categorizer<'a> {
    db: &'a Database,
    rules: &'a RuleTable,
    ai: Option<&'a AiFallback>,
    policy: ReviewPolicy,
    /// Successful AI answers for this run (cleaned description -> verdict)
    ai_cache: Mutex<HashMap<String, AiVerdict>>,
}

impl<'a> Categorizer<'a> {
    pub fn new(
        db: &'a Database,
        rules: &'a RuleTable,
        ai: Option<&'a AiFallback>,
        policy: ReviewPolicy,
    ) -> Self {
        Self {
            db,
            rules,
            ai,
            policy,
            ai_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &ReviewPolicy {
        &self.policy
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<String, AiVerdict>> {
        self.ai_cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Resolve a description to a verdict without persisting anything
    ///
    /// Never fails: tier errors degrade to the next tier, and the last resort
    /// is the default "Other" verdict.
    pub async fn resolve(&self, user_id: i64, description: &str) -> Resolution {
        let merchant_token = normalize_merchant(description);
        let learned = match self.db.lookup_learned_category(user_id, &merchant_token) {
            Ok(learned) => learned,
            Err(e) => {
                warn!(
                    "Learned pattern lookup failed for '{}', falling back to rules: {}",
                    merchant_token, e
                );
                None
            }
        };
        self.resolve_tiers(merchant_token, learned, description).await
    }

    /// Like [`resolve`](Self::resolve), but a failed learned-pattern lookup is
    /// an error instead of a fall-through to the lower tiers
    pub async fn resolve_strict(&self, user_id: i64, description: &str) -> Result<Resolution> {
        let merchant_token = normalize_merchant(description);
        let learned = self.db.lookup_learned_category(user_id, &merchant_token)?;
        Ok(self.resolve_tiers(merchant_token, learned, description).await)
    }

    async fn resolve_tiers(
        &self,
        merchant_token: String,
        learned: Option<Category>,
        description: &str,
    ) -> Resolution {
        // 1. Learned patterns: an explicit user correction always wins
        if let Some(category) = learned {
            debug!("Learned pattern matched '{}': {}", merchant_token, category);
            return Resolution {
                verdict: self.policy.apply(Some((
                    category,
                    CategorizationMethod::LearnedPattern,
                    LEARNED_CONFIDENCE,
                ))),
                merchant_token,
                rule: None,
                ai_cached: false,
            };
        }

        // 2. Static rule table
        if let Some(hit) = self.rules.classify(&merchant_token) {
            debug!(
                "Rule '{}' matched '{}': {} ({})",
                hit.rule, merchant_token, hit.category, hit.confidence
            );
            return Resolution {
                verdict: self.policy.apply(Some((
                    hit.category,
                    CategorizationMethod::RuleBased,
                    hit.confidence,
                ))),
                merchant_token,
                rule: Some(hit.rule),
                ai_cached: false,
            };
        }

        // 3. AI fallback on the lightly cleaned raw description
        if let Some((ai, cached)) = self.classify_with_ai(description).await {
            return Resolution {
                verdict: self.policy.apply(Some((
                    ai.category,
                    CategorizationMethod::AiFallback,
                    ai.confidence,
                ))),
                merchant_token,
                rule: None,
                ai_cached: cached,
            };
        }

        // 4. Nothing decided
        debug!("No tier matched '{}', using default category", merchant_token);
        Resolution {
            verdict: self.policy.apply(None),
            merchant_token,
            rule: None,
            ai_cached: false,
        }
    }

    async fn classify_with_ai(&self, description: &str) -> Option<(AiVerdict, bool)> {
        let ai = self.ai?;
        let cleaned = clean_description(description);
        if cleaned.is_empty() {
            return None;
        }

        // The guard must be gone before the await below
        let cached = self.cache().get(&cleaned).copied();
        if let Some(verdict) = cached {
            return Some((verdict, true));
        }

        let verdict = ai.classify(&cleaned).await?;
        self.cache().insert(cleaned, verdict);
        Some((verdict, false))
    }

    /// Whether an AI answer for this description is already cached
    pub fn is_ai_cached(&self, description: &str) -> bool {
        self.cache().contains_key(&clean_description(description))
    }

    /// Categorize one transaction and persist the result
    ///
    /// Resolution never fails; only the final write can.
    pub async fn categorize(&self, tx: &Transaction) -> Result<CategorizedTransaction> {
        let resolution = self.resolve(tx.user_id, &tx.description).await;
        self.persist(tx, resolution).map(|(categorized, _)| categorized)
    }

    fn persist(
        &self,
        tx: &Transaction,
        resolution: Resolution,
    ) -> Result<(CategorizedTransaction, Resolution)> {
        self.db.update_categorization(tx.id, &resolution.verdict)?;

        let categorized = CategorizedTransaction {
            id: tx.id,
            user_id: tx.user_id,
            date: tx.date,
            amount: tx.amount,
            description: tx.description.clone(),
            merchant_name: tx.merchant_name.clone(),
            merchant_token: resolution.merchant_token.clone(),
            category: resolution.verdict.category,
            categorization_method: resolution.verdict.method,
            confidence: resolution.verdict.confidence,
            needs_review: resolution.verdict.needs_review,
        };
        Ok((categorized, resolution))
    }

    /// Categorize (or re-categorize) the given transactions, stopping at the
    /// first persistence failure
    pub async fn categorize_batch(
        &self,
        transactions: &[Transaction],
        progress: Option<&ProgressCallback>,
    ) -> Result<CategorizeResult> {
        self.run_batch(transactions, progress, false).await
    }

    /// Re-categorize already-categorized transactions
    ///
    /// Unlike [`categorize_batch`](Self::categorize_batch), a failed learned
    /// pattern lookup aborts the batch before that transaction is written.
    pub async fn recategorize_batch(
        &self,
        transactions: &[Transaction],
        progress: Option<&ProgressCallback>,
    ) -> Result<CategorizeResult> {
        self.run_batch(transactions, progress, true).await
    }

    async fn run_batch(
        &self,
        transactions: &[Transaction],
        progress: Option<&ProgressCallback>,
        strict: bool,
    ) -> Result<CategorizeResult> {
        let mut result = CategorizeResult::default();
        let total = transactions.len() as i64;

        for (i, tx) in transactions.iter().enumerate() {
            let resolution = if strict {
                self.resolve_strict(tx.user_id, &tx.description).await?
            } else {
                self.resolve(tx.user_id, &tx.description).await
            };
            let (_, resolution) = self.persist(tx, resolution)?;
            result.record(&resolution);

            if let Some(cb) = progress {
                cb(i as i64 + 1, total);
            }
        }

        Ok(result)
    }

    /// Categorize a user's not-yet-categorized transactions
    pub async fn categorize_pending(
        &self,
        user_id: i64,
        limit: i64,
        progress: Option<&ProgressCallback>,
    ) -> Result<CategorizeResult> {
        let pending = self.db.list_uncategorized(user_id, limit)?;
        self.categorize_batch(&pending, progress).await
    }

    /// Insert sync records for a user and categorize the new ones
    ///
    /// Re-delivered records are skipped. A categorization that cannot be
    /// persisted is logged and left pending; it does not fail the ingest.
    pub async fn ingest(&self, user_id: i64, records: &[NewTransaction]) -> Result<IngestResult> {
        let mut result = IngestResult::default();

        for record in records {
            let id = match self.db.insert_transaction(user_id, record)? {
                TransactionInsertResult::Inserted(id) => id,
                TransactionInsertResult::Duplicate(id) => {
                    debug!("Skipping duplicate sync record (existing transaction {})", id);
                    result.skipped += 1;
                    continue;
                }
            };
            result.inserted += 1;

            let Some(tx) = self.db.get_transaction(user_id, id)? else {
                continue;
            };

            match self.categorize(&tx).await {
                Ok(categorized) => result.categorized.push(categorized),
                Err(e) => {
                    warn!("Failed to persist categorization for transaction {}: {}", id, e);
                    result.failed += 1;
                }
            }
        }

        Ok(result)
    }
}
