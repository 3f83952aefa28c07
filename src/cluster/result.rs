use serde::{Deserialize, Serialize};

/// Which node a passivation applies to, from the evaluating node's view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassivationTarget {
    ThisNode,
    OtherNode,
    AnyNode,
}

impl PassivationTarget {
    /// The same target as seen from the peer.
    pub fn flip(self) -> Self {
        match self {
            Self::ThisNode => Self::OtherNode,
            Self::OtherNode => Self::ThisNode,
            Self::AnyNode => Self::AnyNode,
        }
    }

    fn merge(self, other: Self) -> Self {
        if self == other { self } else { Self::AnyNode }
    }
}

/// Outcome of a join check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JoinCheckResult {
    Ok,
    Passivate {
        target: PassivationTarget,
        reasons: Vec<String>,
    },
    Disconnect {
        reasons: Vec<String>,
    },
}

impl JoinCheckResult {
    pub fn passivate(target: PassivationTarget, reason: impl Into<String>) -> Self {
        Self::Passivate {
            target,
            reasons: vec![reason.into()],
        }
    }

    pub fn disconnect(reason: impl Into<String>) -> Self {
        Self::Disconnect {
            reasons: vec![reason.into()],
        }
    }

    pub fn builder() -> JoinCheckResultBuilder {
        JoinCheckResultBuilder::default()
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    pub fn reasons(&self) -> &[String] {
        match self {
            Self::Ok => &[],
            Self::Passivate { reasons, .. } | Self::Disconnect { reasons } => reasons,
        }
    }

    /// Re-expresses a result produced by the peer in this node's terms.
    pub fn from_peer_view(self) -> Self {
        match self {
            Self::Passivate { target, reasons } => Self::Passivate {
                target: target.flip(),
                reasons,
            },
            other => other,
        }
    }

    /// Combines two results of the same pairing; a disconnect dominates.
    pub fn merge(self, other: Self) -> Self {
        let mut builder = JoinCheckResultBuilder::default();
        builder.absorb(self);
        builder.absorb(other);
        builder.build()
    }
}

/// Accumulates passivation and disconnect reasons before deciding.
#[derive(Debug, Default)]
pub struct JoinCheckResultBuilder {
    target: Option<PassivationTarget>,
    disconnect: bool,
    reasons: Vec<String>,
}

impl JoinCheckResultBuilder {
    pub fn passivate(&mut self, target: PassivationTarget, reason: impl Into<String>) -> &mut Self {
        self.target = Some(match self.target {
            Some(existing) => existing.merge(target),
            None => target,
        });
        self.reasons.push(reason.into());
        self
    }

    pub fn disconnect(&mut self, reason: impl Into<String>) -> &mut Self {
        self.disconnect = true;
        self.reasons.push(reason.into());
        self
    }

    pub fn absorb(&mut self, result: JoinCheckResult) -> &mut Self {
        match result {
            JoinCheckResult::Ok => {}
            JoinCheckResult::Passivate { target, reasons } => {
                for reason in reasons {
                    self.passivate(target, reason);
                }
            }
            JoinCheckResult::Disconnect { reasons } => {
                self.disconnect = true;
                self.reasons.extend(reasons);
            }
        }
        self
    }

    pub fn has_reasons(&self) -> bool {
        !self.reasons.is_empty()
    }

    pub fn build(self) -> JoinCheckResult {
        if self.disconnect {
            JoinCheckResult::Disconnect {
                reasons: self.reasons,
            }
        } else if let Some(target) = self.target {
            JoinCheckResult::Passivate {
                target,
                reasons: self.reasons,
            }
        } else {
            JoinCheckResult::Ok
        }
    }
}
