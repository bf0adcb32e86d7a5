use rmcp::schemars::JsonSchema;
use serde::Deserialize;

#[derive(Deserialize, JsonSchema)]
pub struct ResolveTargetParams {
    /// Natural-language change request
    pub query: String,
    /// Max candidate files (default: 10)
    pub limit: Option<usize>,
    /// Project root path override
    pub project_path: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
pub struct BuildContextParams {
    /// Natural-language change request
    pub query: String,
    /// Explicit target file (project-relative); resolved from the query when omitted
    pub target_file: Option<String>,
    /// Token budget, clamped to 6000..=12000 (default: 6000)
    pub token_budget: Option<usize>,
    /// Project root path override
    pub project_path: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
pub struct RunPipelineParams {
    /// Natural-language change request
    pub query: String,
    /// Ground-truth relevant paths, comma-separated (project-relative)
    pub ground_truth: String,
    /// Explicit target file
    pub target_file: Option<String>,
    /// Project root path override
    pub project_path: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
pub struct GetGraphStatsParams {
    /// Project root path override
    pub project_path: Option<String>,
}
