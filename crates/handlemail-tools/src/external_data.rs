//! `linkedin_fresh_data` / `linkedin_data_api` / `deep_research`: paid,
//! provider-backed lookups. Grounded on `tools/external_data/linkedin`'s
//! RapidAPI-wrapped shape — each call is its own citation (never deduped),
//! matching `CitationLedger::add_api`'s "API sources are always unique".

use std::sync::Arc;

use asupersync::Cx;
use handlemail_core::{CitationSource, Error, Result};
use serde_json::Value as Json;

use crate::capability::ExternalDataProvider;
use crate::registry::{BoxFuture, Tool, ToolContext, ToolOutputWithCitations};

/// One `Tool` per provider-backed data source. `source_name` is both the
/// registered tool name and the label passed to the provider, so one
/// `Unconfigured` backend can serve `linkedin_fresh_data`,
/// `linkedin_data_api`, and `deep_research` alike.
pub struct ExternalDataTool {
    source_name: &'static str,
    provider: Arc<dyn ExternalDataProvider>,
}

impl ExternalDataTool {
    #[must_use]
    pub fn new(source_name: &'static str, provider: Arc<dyn ExternalDataProvider>) -> Self {
        Self { source_name, provider }
    }
}

impl Tool for ExternalDataTool {
    fn name(&self) -> &'static str {
        self.source_name
    }

    fn call<'a>(
        &'a self,
        _cx: &'a Cx,
        args: Json,
        _ctx: &'a ToolContext<'a>,
    ) -> BoxFuture<'a, Result<ToolOutputWithCitations>> {
        Box::pin(async move {
            let query = args.get("query").and_then(Json::as_str).ok_or_else(|| Error::ToolError {
                tool_name: self.source_name.to_string(),
                message: "missing required string argument 'query'".to_string(),
            })?;
            let result = self.provider.fetch(self.source_name, query)?;
            Ok(ToolOutputWithCitations {
                content: result.content,
                citations: vec![CitationSource::Api { title: result.title, url: result.source_url }],
                metadata: None,
            })
        })
    }
}
