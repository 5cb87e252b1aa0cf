use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::agent::ExternalModel;
use crate::engine::invoker::{
    InvocationError, InvocationOutput, InvocationRequest, ModelInvoker, ProgressSender,
};

/// Sends `external:` models to the HTTP invoker and everything else to the CLI
pub struct RoutingInvoker {
    cli: Arc<dyn ModelInvoker>,
    external: Arc<dyn ModelInvoker>,
}

impl RoutingInvoker {
    pub fn new(cli: Arc<dyn ModelInvoker>, external: Arc<dyn ModelInvoker>) -> Self {
        Self { cli, external }
    }
}

#[async_trait]
impl ModelInvoker for RoutingInvoker {
    async fn invoke(
        &self,
        request: InvocationRequest,
        progress: ProgressSender,
    ) -> Result<InvocationOutput, InvocationError> {
        if request.config.model.starts_with(ExternalModel::PREFIX) {
            self.external.invoke(request, progress).await
        } else {
            self.cli.invoke(request, progress).await
        }
    }
}
