// Template render/preview HTTP API.
//
// Renders bundle templates (scenario scaffolds, job manifests) with
// variable substitution. Output paths are restricted to an allowlist and
// project names are validated against traversal.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use axum::{extract::State, routing::post, Json, Router};
use converge_core::{CoreError, Result};
use serde::{Deserialize, Serialize};

/// Directories render output may land in.
const ALLOWED_OUTPUT_ROOTS: &[&str] = &["/workspace-content", "/tmp", "/var/folders"];

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderTemplateRequest {
    pub template_path: String,
    pub output_path: String,
    pub project_name: String,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderTemplateResponse {
    pub success: bool,
    pub files_created: Vec<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewTemplateRequest {
    pub template_path: String,
    pub project_name: String,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreviewFile {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreviewTemplateResponse {
    pub files: Vec<PreviewFile>,
    pub errors: Vec<String>,
}

/// Reject names that could escape the output root.
pub fn validate_project_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CoreError::validation("project name must not be empty"));
    }
    if name.contains('/') || name.contains('\\') || name.contains("..") || name.starts_with('.') {
        return Err(CoreError::validation(format!(
            "project name {name:?} contains forbidden path characters"
        )));
    }
    Ok(())
}

/// Only allow output under the fixed roots.
pub fn validate_output_path(path: &str) -> Result<()> {
    let normalized = Path::new(path);
    if path.contains("..") {
        return Err(CoreError::validation("output path must not contain .."));
    }
    if !ALLOWED_OUTPUT_ROOTS
        .iter()
        .any(|root| normalized.starts_with(root))
    {
        return Err(CoreError::validation(format!(
            "output path must be under one of {ALLOWED_OUTPUT_ROOTS:?}"
        )));
    }
    Ok(())
}

/// `{{name}}` substitution; `projectName` is always defined.
fn substitute(template: &str, project_name: &str, variables: &BTreeMap<String, String>) -> (String, Vec<String>) {
    let mut output = template.replace("{{projectName}}", project_name);
    let mut warnings = vec![];
    for (key, value) in variables {
        output = output.replace(&format!("{{{{{key}}}}}"), value);
    }
    if output.contains("{{") {
        warnings.push("template contains unresolved placeholders".to_string());
    }
    (output, warnings)
}

fn render_files(
    template_path: &str,
    project_name: &str,
    variables: &BTreeMap<String, String>,
) -> Result<(Vec<(PathBuf, String)>, Vec<String>)> {
    validate_project_name(project_name)?;
    let root = Path::new(template_path);
    if !root.is_dir() {
        return Err(CoreError::validation(format!(
            "template path {template_path} is not a directory"
        )));
    }
    let mut files = vec![];
    let mut warnings = vec![];
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = std::fs::read_dir(&dir)
            .map_err(|e| CoreError::fatal(format!("failed to list templates: {e}")))?;
        for entry in entries {
            let entry =
                entry.map_err(|e| CoreError::fatal(format!("failed to list templates: {e}")))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| CoreError::fatal(format!("failed to read template: {e}")))?;
            let relative = path
                .strip_prefix(root)
                .map_err(|e| CoreError::fatal(format!("path escape: {e}")))?;
            let (rendered, mut file_warnings) = substitute(&raw, project_name, variables);
            warnings.append(&mut file_warnings);
            files.push((PathBuf::from(project_name).join(relative), rendered));
        }
    }
    files.sort();
    Ok((files, warnings))
}

#[derive(Clone, Default)]
pub struct TemplateState;

pub fn routes() -> Router {
    Router::new()
        .route("/api/render-template", post(render_template))
        .route("/api/preview-template", post(preview_template))
        .with_state(TemplateState)
}

/// POST /api/render-template
pub async fn render_template(
    State(_state): State<TemplateState>,
    Json(req): Json<RenderTemplateRequest>,
) -> Json<RenderTemplateResponse> {
    let mut response = RenderTemplateResponse {
        success: false,
        files_created: vec![],
        errors: vec![],
        warnings: vec![],
    };
    if let Err(e) = validate_output_path(&req.output_path) {
        response.errors.push(e.to_string());
        return Json(response);
    }
    match render_files(&req.template_path, &req.project_name, &req.variables) {
        Ok((files, warnings)) => {
            response.warnings = warnings;
            for (relative, content) in files {
                let target = Path::new(&req.output_path).join(&relative);
                let write = (|| -> std::io::Result<()> {
                    if let Some(parent) = target.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&target, &content)
                })();
                match write {
                    Ok(()) => response
                        .files_created
                        .push(target.to_string_lossy().into_owned()),
                    Err(e) => response.errors.push(format!(
                        "failed to write {}: {e}",
                        target.display()
                    )),
                }
            }
            response.success = response.errors.is_empty();
        }
        Err(e) => response.errors.push(e.to_string()),
    }
    Json(response)
}

/// POST /api/preview-template
pub async fn preview_template(
    State(_state): State<TemplateState>,
    Json(req): Json<PreviewTemplateRequest>,
) -> Json<PreviewTemplateResponse> {
    match render_files(&req.template_path, &req.project_name, &req.variables) {
        Ok((files, _warnings)) => Json(PreviewTemplateResponse {
            files: files
                .into_iter()
                .map(|(path, content)| PreviewFile {
                    path: path.to_string_lossy().into_owned(),
                    content,
                })
                .collect(),
            errors: vec![],
        }),
        Err(e) => Json(PreviewTemplateResponse {
            files: vec![],
            errors: vec![e.to_string()],
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_name_validation() {
        assert!(validate_project_name("billing-evals").is_ok());
        assert!(validate_project_name("a/b").is_err());
        assert!(validate_project_name("a\\b").is_err());
        assert!(validate_project_name("..sneaky").is_err());
        assert!(validate_project_name(".hidden").is_err());
        assert!(validate_project_name("").is_err());
    }

    #[test]
    fn test_output_path_allowlist() {
        assert!(validate_output_path("/tmp/render").is_ok());
        assert!(validate_output_path("/workspace-content/x").is_ok());
        assert!(validate_output_path("/var/folders/xy").is_ok());
        assert!(validate_output_path("/etc/passwd").is_err());
        assert!(validate_output_path("/tmp/../etc").is_err());
    }

    #[test]
    fn test_substitution() {
        let mut variables = BTreeMap::new();
        variables.insert("model".to_string(), "mock-small".to_string());
        let (out, warnings) = substitute(
            "project: {{projectName}}\nmodel: {{model}}\n",
            "billing-evals",
            &variables,
        );
        assert_eq!(out, "project: billing-evals\nmodel: mock-small\n");
        assert!(warnings.is_empty());

        let (_, warnings) = substitute("left: {{unknown}}", "p", &variables);
        assert_eq!(warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_preview_renders_tree() {
        let dir = std::env::temp_dir().join(format!("tmpl-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(dir.join("scenarios")).unwrap();
        std::fs::write(dir.join("arena.yaml"), "name: {{projectName}}\n").unwrap();
        std::fs::write(dir.join("scenarios/base.yaml"), "id: {{projectName}}-base\n").unwrap();

        let response = preview_template(
            State(TemplateState),
            Json(PreviewTemplateRequest {
                template_path: dir.to_string_lossy().into_owned(),
                project_name: "billing".into(),
                variables: BTreeMap::new(),
            }),
        )
        .await;
        assert!(response.0.errors.is_empty());
        assert_eq!(response.0.files.len(), 2);
        assert!(response.0.files[0].path.starts_with("billing"));
        assert!(response.0.files.iter().any(|f| f.content.contains("billing-base")));
        std::fs::remove_dir_all(dir).ok();
    }
}
