use serde::{Deserialize, Serialize};

use tillerp_core::{AggregateId, Entity};

/// Journals whose payments must carry a mobile-money transaction id.
pub const DEFAULT_TRANSACTION_ID_JOURNALS: [&str; 2] = ["Momo Pay", "Airtel Pay"];

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JournalId(pub AggregateId);

impl JournalId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for JournalId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalKind {
    Sale,
    Purchase,
    Cash,
    Bank,
    General,
}

/// Which journal names require a transaction id. Matching is exact (case and spacing).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionIdPolicy {
    journal_names: Vec<String>,
}

impl TransactionIdPolicy {
    pub fn new<I, S>(journal_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            journal_names: journal_names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn requires_transaction_id(&self, journal_name: &str) -> bool {
        self.journal_names.iter().any(|n| n == journal_name)
    }

    pub fn journal_names(&self) -> &[String] {
        &self.journal_names
    }
}

impl Default for TransactionIdPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_TRANSACTION_ID_JOURNALS)
    }
}

/// A payment channel ("Momo Pay", "Cash", ...).
///
/// `show_transaction_id` is stored, and recomputed whenever the name changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Journal {
    id: JournalId,
    name: String,
    kind: JournalKind,
    show_transaction_id: bool,
}

impl Journal {
    pub fn new(
        id: JournalId,
        name: impl Into<String>,
        kind: JournalKind,
        policy: &TransactionIdPolicy,
    ) -> Self {
        let name = name.into();
        let show_transaction_id = policy.requires_transaction_id(&name);
        Self {
            id,
            name,
            kind,
            show_transaction_id,
        }
    }

    pub fn rename(&mut self, name: impl Into<String>, policy: &TransactionIdPolicy) {
        self.name = name.into();
        self.show_transaction_id = policy.requires_transaction_id(&self.name);
    }

    pub fn id_typed(&self) -> JournalId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> JournalKind {
        self.kind
    }

    pub fn show_transaction_id(&self) -> bool {
        self.show_transaction_id
    }
}

impl Entity for Journal {
    type Id = JournalId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
