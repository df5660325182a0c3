use serde::{Deserialize, Serialize};
use serde_json::Value;

use poolwright_core::{Phase, PoolSpec, PoolState};

use crate::addr::ResourceAddr;
use crate::diff::{Field, FieldClass, PoolFields};

/// Per-field verdict of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Change {
    Unchanged,
    Update,
    Replace,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldPlan {
    pub field: Field,
    pub change: Change,
    pub expected: Value,
    pub actual: Value,
}

/// A remote operation the apply will issue, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    Create,
    /// One batched update call.
    Update { fields: Vec<Field> },
    Scale { from: u64, to: u64 },
    Delete,
    /// Delete the existing pool, then create it again.
    Replace { fields: Vec<Field> },
}

/// Why this plan entry exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cause {
    /// Never provisioned.
    FirstProvision,
    /// Tracked in state but the pool no longer exists; it is created again.
    Vanished,
    InSync,
    /// Matches the declaration but is running with the wrong number of
    /// members. Apply issues nothing and waits for them.
    Degraded,
    /// The remote pool differs from the declaration.
    Drift,
    /// The remote pool is in phase `error` and must be recreated.
    Failed,
    /// Tracked in state but no longer declared.
    Orphaned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub addr: ResourceAddr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_phase: Option<Phase>,
    pub cause: Cause,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldPlan>,
    pub steps: Vec<Step>,
    /// At least one step destroys the existing pool.
    pub destructive: bool,
}

impl Plan {
    pub fn has_changes(&self) -> bool {
        !self.steps.is_empty()
    }

    /// Apply has something to do or wait for.
    pub fn needs_apply(&self) -> bool {
        self.has_changes() || self.cause == Cause::Degraded
    }

    pub fn changed_fields(&self) -> impl Iterator<Item = &FieldPlan> {
        self.fields.iter().filter(|f| f.change != Change::Unchanged)
    }

    pub fn replaced_fields(&self) -> Vec<Field> {
        self.fields
            .iter()
            .filter(|f| f.change == Change::Replace)
            .map(|f| f.field)
            .collect()
    }

    /// Plan removal of a tracked pool no longer in the manifest.
    pub fn orphan(addr: ResourceAddr, pool_id: impl Into<String>) -> Self {
        Self {
            addr,
            pool_id: Some(pool_id.into()),
            observed_phase: None,
            cause: Cause::Orphaned,
            fields: Vec::new(),
            steps: vec![Step::Delete],
            destructive: true,
        }
    }
}

/// Compare desired against observed state and lay out the operations.
///
/// Pure: the caller fetched `observed`. When any replacement field differs
/// the whole pool is recreated and no update or scale is issued, since the
/// new pool is created from the full desired spec.
pub fn build(addr: ResourceAddr, desired: &PoolSpec, observed: Option<&PoolState>) -> Plan {
    let Some(observed) = observed else {
        return Plan {
            addr,
            pool_id: None,
            observed_phase: None,
            cause: Cause::FirstProvision,
            fields: Vec::new(),
            steps: vec![Step::Create],
            destructive: false,
        };
    };

    let fields: Vec<FieldPlan> = Field::ALL
        .iter()
        .map(|&field| {
            let expected = desired.field(field);
            let actual = observed.field(field);
            let change = if expected == actual {
                Change::Unchanged
            } else if field.class() == FieldClass::Replace {
                Change::Replace
            } else {
                Change::Update
            };
            FieldPlan {
                field,
                change,
                expected,
                actual,
            }
        })
        .collect();

    let replaced: Vec<Field> = fields
        .iter()
        .filter(|f| f.change == Change::Replace)
        .map(|f| f.field)
        .collect();
    let updated: Vec<Field> = fields
        .iter()
        .filter(|f| f.change == Change::Update && f.field.class() == FieldClass::Update)
        .map(|f| f.field)
        .collect();
    let scaled = desired.size != observed.size;

    let failed = observed.phase == Phase::Error;
    let mut steps = Vec::new();
    if failed || !replaced.is_empty() {
        steps.push(Step::Replace { fields: replaced });
    } else {
        // Update first: a scale-up then creates members from the new
        // instance type and disk size.
        if !updated.is_empty() {
            steps.push(Step::Update { fields: updated });
        }
        if scaled {
            steps.push(Step::Scale {
                from: observed.size,
                to: desired.size,
            });
        }
    }

    let destructive = steps.iter().any(|s| matches!(s, Step::Replace { .. }));
    let cause = if failed {
        Cause::Failed
    } else if !steps.is_empty() {
        Cause::Drift
    } else if !observed.is_settled() {
        Cause::Degraded
    } else {
        Cause::InSync
    };

    Plan {
        addr,
        pool_id: Some(observed.id.clone()),
        observed_phase: Some(observed.phase),
        cause,
        fields,
        steps,
        destructive,
    }
}
