// OpenAPI specification generation
//
// Shared by the API server (for Swagger UI) and the export-openapi binary.

use crate::api;
use utoipa::OpenApi;

/// OpenAPI documentation for the Orchestra API
#[derive(OpenApi)]
#[openapi(
    paths(
        api::workflows::start_workflow,
        api::workflows::get_workflow_status,
        api::workflows::cancel_workflow,
    ),
    components(
        schemas(
            api::ErrorResponse,
            api::workflows::StartWorkflowResponse,
            api::workflows::WorkflowStatusResponse,
            api::workflows::WorkflowStatusDto,
            api::workflows::WorkflowFailure,
            api::workflows::CancelWorkflowRequest,
        )
    ),
    tags(
        (name = "workflows", description = "Start, poll and cancel durable workflow instances")
    ),
    info(
        title = "Orchestra API",
        version = "0.1.0",
        description = "HTTP front door for the durable workflow engine",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
pub struct ApiDoc;

impl ApiDoc {
    /// Generate the OpenAPI spec as a pretty-printed JSON string
    pub fn to_json() -> Result<String, serde_json::Error> {
        Self::openapi().to_pretty_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_lists_workflow_paths() {
        let spec: serde_json::Value = serde_json::from_str(&ApiDoc::to_json().unwrap()).unwrap();
        let paths = spec["paths"].as_object().unwrap();

        assert!(paths.contains_key("/workflows/{definitionName}"));
        assert!(paths.contains_key("/workflows/status"));
        assert!(paths.contains_key("/workflows/instances/{instanceId}/cancel"));
    }
}
