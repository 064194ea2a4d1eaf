use async_trait::async_trait;

use super::{Attributes, Authorizer, Verdict};

#[derive(Debug, Default)]
pub struct AlwaysAllowAuthorizer;

#[async_trait]
impl Authorizer for AlwaysAllowAuthorizer {
    async fn authorize(&self, _attrs: &Attributes) -> Verdict {
        Verdict::allow("")
    }

    fn name(&self) -> &str {
        "AlwaysAllow"
    }
}

#[derive(Debug, Default)]
pub struct AlwaysDenyAuthorizer;

#[async_trait]
impl Authorizer for AlwaysDenyAuthorizer {
    async fn authorize(&self, _attrs: &Attributes) -> Verdict {
        Verdict::deny("Everything is forbidden.")
    }

    fn name(&self) -> &str {
        "AlwaysDeny"
    }
}
