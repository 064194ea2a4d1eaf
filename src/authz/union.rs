use async_trait::async_trait;
use std::sync::Arc;

use super::{Attributes, Authorizer, AuthzError, Decision, Verdict};

/// Asks each authorizer in turn until one commits.
pub struct UnionAuthorizer {
    authorizers: Vec<Arc<dyn Authorizer>>,
}

impl UnionAuthorizer {
    pub fn new(authorizers: Vec<Arc<dyn Authorizer>>) -> Self {
        Self { authorizers }
    }
}

#[async_trait]
impl Authorizer for UnionAuthorizer {
    async fn authorize(&self, attrs: &Attributes) -> Verdict {
        let mut errors = Vec::new();
        let mut reasons = Vec::new();

        for authorizer in &self.authorizers {
            let verdict = authorizer.authorize(attrs).await;
            if let Some(err) = verdict.error {
                errors.push(err);
            }
            if !verdict.reason.is_empty() {
                reasons.push(verdict.reason);
            }
            match verdict.decision {
                Decision::Allow | Decision::Deny => {
                    return Verdict {
                        decision: verdict.decision,
                        reason: reasons.join("\n"),
                        error: aggregate(errors),
                    };
                }
                Decision::NoOpinion => {}
            }
        }

        Verdict {
            decision: Decision::NoOpinion,
            reason: reasons.join("\n"),
            error: aggregate(errors),
        }
    }

    fn name(&self) -> &str {
        "union"
    }
}

fn aggregate(mut errors: Vec<AuthzError>) -> Option<AuthzError> {
    match errors.len() {
        0 => None,
        1 => errors.pop(),
        _ => Some(AuthzError::Aggregate(errors)),
    }
}
