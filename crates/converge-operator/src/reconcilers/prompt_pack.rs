// PromptPack reconciliation: fetch the source (ConfigMap, Git archive),
// validate, compile, and cache the compiled JSON under a content hash.
// OCI sources are rejected until a registry puller exists; they never
// compile silently to an empty pack.

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;

use converge_core::{CoreError, Result};
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::{Event, EventType};
use kube::{Api, Resource, ResourceExt};
use serde_json::json;
use sha2::{Digest, Sha256};

use super::Context;
use crate::conditions::{upsert_condition, Condition, ConditionStatus};
use crate::resolver::RefResolver;
use crate::resources::{PackSource, PromptPack, PromptPackStatus, PromptTemplate};

/// File name carrying the prompt map inside a git archive.
const PACK_MANIFEST: &str = "pack.yaml";

/// Outcome of compiling one pack.
#[derive(Debug, Clone)]
pub struct CompiledPack {
    pub json: serde_json::Value,
    pub content_hash: String,
    pub warnings: Vec<String>,
}

/// Archive URL for a git source, in the `archive/<revision>.tar.gz`
/// convention of the common forges. Non-HTTP remotes are rejected.
pub fn git_archive_url(repository: &str, revision: &str) -> Result<String> {
    if !repository.starts_with("http://") && !repository.starts_with("https://") {
        return Err(CoreError::validation(format!(
            "git pack source {repository:?} must be an http(s) repository url"
        )));
    }
    Ok(format!(
        "{}/archive/{revision}.tar.gz",
        repository.trim_end_matches('/')
    ))
}

/// Extract the prompt map from a gzipped tar archive: the first entry
/// named `pack.yaml` (at any depth; forges nest everything under a
/// `<repo>-<revision>/` directory) parsed as name -> template.
pub fn parse_pack_archive(bytes: &[u8]) -> Result<BTreeMap<String, PromptTemplate>> {
    let decoder = flate2::read::GzDecoder::new(bytes);
    let mut archive = tar::Archive::new(decoder);
    let entries = archive
        .entries()
        .map_err(|e| CoreError::validation(format!("unreadable pack archive: {e}")))?;
    for entry in entries {
        let mut entry =
            entry.map_err(|e| CoreError::validation(format!("unreadable pack archive: {e}")))?;
        let is_manifest = entry
            .path()
            .ok()
            .and_then(|p| p.file_name().and_then(|f| f.to_str().map(str::to_owned)))
            .map_or(false, |name| name == PACK_MANIFEST);
        if !is_manifest {
            continue;
        }
        let mut raw = String::new();
        entry
            .read_to_string(&mut raw)
            .map_err(|e| CoreError::validation(format!("unreadable {PACK_MANIFEST}: {e}")))?;
        return serde_yaml::from_str(&raw)
            .map_err(|e| CoreError::validation(format!("invalid {PACK_MANIFEST}: {e}")));
    }
    Err(CoreError::validation(format!(
        "pack archive contains no {PACK_MANIFEST}"
    )))
}

async fn fetch_git_pack(
    repository: &str,
    revision: &str,
) -> Result<BTreeMap<String, PromptTemplate>> {
    let url = git_archive_url(repository, revision)?;
    let response = reqwest::get(&url)
        .await
        .map_err(|e| CoreError::transient(format!("pack archive fetch: {e}")))?
        .error_for_status()
        .map_err(|e| CoreError::transient(format!("pack archive fetch: {e}")))?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| CoreError::transient(format!("pack archive fetch: {e}")))?;
    parse_pack_archive(&bytes)
}

/// Validate and compile a pack. Warnings do not abort compilation; the
/// caller decides how they surface (the agent reconciler downgrades
/// PackContentValid on any warning).
pub async fn compile_pack(pack: &PromptPack, resolver: &dyn RefResolver) -> Result<CompiledPack> {
    semver::Version::parse(&pack.spec.version).map_err(|e| {
        CoreError::validation(format!("version {:?} is not semver: {e}", pack.spec.version))
    })?;

    let namespace = pack.namespace().unwrap_or_else(|| "default".into());
    // Inline prompts win over fetched ones of the same name
    let mut prompts = pack.spec.prompts.clone();
    let fetched = match &pack.spec.source {
        PackSource::ConfigMap { name } => resolver
            .config_map(&namespace, name)
            .await?
            .ok_or_else(|| CoreError::validation(format!("source configmap {name} not found")))?
            .into_iter()
            .map(|(name, template)| {
                (
                    name,
                    PromptTemplate {
                        template,
                        params: vec![],
                    },
                )
            })
            .collect(),
        PackSource::Git {
            repository,
            revision,
        } => fetch_git_pack(repository, revision).await?,
        PackSource::Oci { image } => {
            return Err(CoreError::validation(format!(
                "oci pack source {image:?} is not supported; publish the pack as a configMap or git source"
            )));
        }
    };
    for (prompt_name, template) in fetched {
        prompts.entry(prompt_name).or_insert(template);
    }

    let mut warnings = vec![];
    if prompts.is_empty() {
        warnings.push("pack compiles to zero prompts".to_string());
    }
    for (name, prompt) in &prompts {
        if prompt.template.trim().is_empty() {
            warnings.push(format!("prompt {name} has an empty template"));
        }
        for param in &prompt.params {
            if !prompt.template.contains(&format!("{{{{{param}}}}}")) {
                warnings.push(format!("prompt {name} declares unused param {param}"));
            }
        }
    }

    let json = json!({
        "version": pack.spec.version,
        "prompts": prompts,
    });
    let canonical = serde_json::to_vec(&json)
        .map_err(|e| CoreError::fatal(format!("serialize compiled pack: {e}")))?;
    let content_hash = hex::encode(Sha256::digest(&canonical))[..16].to_string();

    Ok(CompiledPack {
        json,
        content_hash,
        warnings,
    })
}

/// Name of the ConfigMap caching a pack's compiled JSON.
pub fn compiled_config_map_name(pack_name: &str) -> String {
    format!("promptpack-{pack_name}-compiled")
}

pub async fn reconcile(pack: Arc<PromptPack>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = ctx.metrics.count_and_measure("PromptPack");
    ctx.diagnostics.write().last_event = chrono::Utc::now();

    let namespace = pack.namespace().unwrap_or_else(|| "default".into());
    let name = pack.name_any();
    let generation = pack.metadata.generation.unwrap_or(0);
    let recorder = ctx
        .diagnostics
        .read()
        .recorder(ctx.client.clone(), pack.as_ref());

    let mut status = pack.status.clone().unwrap_or_default();
    status.observed_generation = Some(generation);

    match compile_pack(&pack, ctx.resolver.as_ref()).await {
        Ok(compiled) => {
            let owner = pack
                .controller_owner_ref(&())
                .ok_or_else(|| CoreError::fatal("pack has no object metadata"))?;
            // Cache the compiled JSON under its content hash
            let cache: k8s_openapi::api::core::v1::ConfigMap = serde_json::from_value(json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {
                    "name": compiled_config_map_name(&name),
                    "namespace": namespace,
                    "annotations": { "converge.dev/content-hash": compiled.content_hash },
                    "ownerReferences": [owner],
                },
                "data": { "pack.json": compiled.json.to_string() },
            }))
            .map_err(|e| CoreError::fatal(format!("render pack cache: {e}")))?;
            let api: Api<k8s_openapi::api::core::v1::ConfigMap> =
                Api::namespaced(ctx.client.clone(), &namespace);
            api.patch(
                &compiled_config_map_name(&name),
                &PatchParams::apply("converge-operator").force(),
                &Patch::Apply(&cache),
            )
            .await
            .map_err(|e| CoreError::transient(format!("pack cache apply: {e}")))?;

            let (condition, event_type, reason) = if compiled.warnings.is_empty() {
                (
                    Condition::new("Ready", ConditionStatus::True, "Compiled", "", generation),
                    EventType::Normal,
                    "Compiled",
                )
            } else {
                (
                    Condition::new(
                        "Ready",
                        ConditionStatus::False,
                        "ContentIssuesFound",
                        compiled.warnings.join("; "),
                        generation,
                    ),
                    EventType::Warning,
                    "ContentIssuesFound",
                )
            };
            upsert_condition(&mut status.conditions, condition);
            status.content_hash = Some(compiled.content_hash.clone());
            recorder
                .publish(Event {
                    type_: event_type,
                    reason: reason.into(),
                    note: Some(format!("content hash {}", compiled.content_hash)),
                    action: "Compile".into(),
                    secondary: None,
                })
                .await
                .ok();
        }
        Err(e) if matches!(e, CoreError::Validation(_)) => {
            upsert_condition(
                &mut status.conditions,
                Condition::new(
                    "Ready",
                    ConditionStatus::False,
                    "ValidationFailed",
                    e.to_string(),
                    generation,
                ),
            );
            recorder
                .publish(Event {
                    type_: EventType::Warning,
                    reason: "ValidationFailed".into(),
                    note: Some(e.to_string()),
                    action: "Compile".into(),
                    secondary: None,
                })
                .await
                .ok();
        }
        Err(e) => return Err(e),
    }

    patch_status(&ctx, &namespace, &name, &status).await?;
    ctx.backoff.reset(&format!("pack/{namespace}/{name}"));
    Ok(Action::await_change())
}

async fn patch_status(
    ctx: &Context,
    namespace: &str,
    name: &str,
    status: &PromptPackStatus,
) -> Result<()> {
    let api: Api<PromptPack> = Api::namespaced(ctx.client.clone(), namespace);
    api.patch_status(
        name,
        &PatchParams::default(),
        &Patch::Merge(json!({ "status": status })),
    )
    .await
    .map_err(|e| CoreError::transient(format!("status patch: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::StaticResolver;
    use crate::resources::PromptPackSpec;
    use std::collections::BTreeMap;

    fn pack(version: &str, prompts: BTreeMap<String, PromptTemplate>) -> PromptPack {
        let mut pack = PromptPack::new(
            "support-pack",
            PromptPackSpec {
                version: version.into(),
                source: PackSource::ConfigMap {
                    name: "support-pack-src".into(),
                },
                prompts,
            },
        );
        pack.metadata.namespace = Some("acme".into());
        pack
    }

    fn inline(template: &str, params: &[&str]) -> PromptTemplate {
        PromptTemplate {
            template: template.into(),
            params: params.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_compile_valid_pack() {
        let mut prompts = BTreeMap::new();
        prompts.insert(
            "system".to_string(),
            inline("You are {{agentName}}, a support agent.", &["agentName"]),
        );
        let resolver = StaticResolver::default().with_config_map(
            "acme",
            "support-pack-src",
            BTreeMap::new(),
        );
        let compiled = compile_pack(&pack("1.2.0", prompts), &resolver).await.unwrap();
        assert!(compiled.warnings.is_empty());
        assert_eq!(compiled.content_hash.len(), 16);
        assert_eq!(compiled.json["version"], "1.2.0");
    }

    #[tokio::test]
    async fn test_compile_hash_is_content_addressed() {
        let resolver = StaticResolver::default().with_config_map(
            "acme",
            "support-pack-src",
            BTreeMap::new(),
        );
        let mut prompts = BTreeMap::new();
        prompts.insert("system".to_string(), inline("stable", &[]));

        let a = compile_pack(&pack("1.0.0", prompts.clone()), &resolver)
            .await
            .unwrap();
        let b = compile_pack(&pack("1.0.0", prompts.clone()), &resolver)
            .await
            .unwrap();
        assert_eq!(a.content_hash, b.content_hash);

        prompts.insert("system".to_string(), inline("changed", &[]));
        let c = compile_pack(&pack("1.0.0", prompts), &resolver).await.unwrap();
        assert_ne!(a.content_hash, c.content_hash);
    }

    #[tokio::test]
    async fn test_bad_semver_rejected() {
        let resolver = StaticResolver::default();
        let err = compile_pack(&pack("one-point-two", BTreeMap::new()), &resolver)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_warnings_for_content_issues() {
        let mut prompts = BTreeMap::new();
        prompts.insert("empty".to_string(), inline("  ", &[]));
        prompts.insert("misparam".to_string(), inline("plain text", &["tone"]));
        let resolver = StaticResolver::default().with_config_map(
            "acme",
            "support-pack-src",
            BTreeMap::new(),
        );
        let compiled = compile_pack(&pack("1.0.0", prompts), &resolver).await.unwrap();
        assert_eq!(compiled.warnings.len(), 2);
    }

    #[tokio::test]
    async fn test_configmap_source_merges_prompts() {
        let mut data = BTreeMap::new();
        data.insert("greeting".to_string(), "Hello {{userName}}".to_string());
        let resolver = StaticResolver::default().with_config_map("acme", "support-pack-src", data);

        let compiled = compile_pack(&pack("1.0.0", BTreeMap::new()), &resolver)
            .await
            .unwrap();
        assert!(compiled.json["prompts"]["greeting"]["template"]
            .as_str()
            .unwrap()
            .contains("Hello"));
    }

    #[tokio::test]
    async fn test_missing_configmap_is_validation_error() {
        let resolver = StaticResolver::default();
        let err = compile_pack(&pack("1.0.0", BTreeMap::new()), &resolver)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    fn pack_with_source(source: PackSource) -> PromptPack {
        let mut pack = PromptPack::new(
            "support-pack",
            PromptPackSpec {
                version: "1.0.0".into(),
                source,
                prompts: BTreeMap::new(),
            },
        );
        pack.metadata.namespace = Some("acme".into());
        pack
    }

    fn archive_with(path: &str, contents: &str) -> Vec<u8> {
        let encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let data = contents.as_bytes();
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, data).unwrap();
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_git_archive_url() {
        assert_eq!(
            git_archive_url("https://forge.acme.io/packs/support", "v1.2.0").unwrap(),
            "https://forge.acme.io/packs/support/archive/v1.2.0.tar.gz"
        );
        // Trailing slashes normalize
        assert_eq!(
            git_archive_url("https://forge.acme.io/packs/support/", "main").unwrap(),
            "https://forge.acme.io/packs/support/archive/main.tar.gz"
        );
        // SSH remotes are rejected, not silently skipped
        let err = git_archive_url("git@forge.acme.io:packs/support.git", "main").unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_parse_pack_archive_nested_manifest() {
        let manifest = r#"
system:
  template: "You are helpful."
greeting:
  template: "Hello {{userName}}"
  params: ["userName"]
"#;
        // Forges nest contents under a <repo>-<revision>/ directory
        let bytes = archive_with("support-v1.2.0/pack.yaml", manifest);
        let prompts = parse_pack_archive(&bytes).unwrap();
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts["greeting"].params, vec!["userName"]);
    }

    #[test]
    fn test_parse_pack_archive_without_manifest() {
        let bytes = archive_with("support-v1.2.0/README.md", "not a pack");
        let err = parse_pack_archive(&bytes).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert!(err.to_string().contains("pack.yaml"));
    }

    #[test]
    fn test_parse_pack_archive_bad_yaml() {
        let bytes = archive_with("pack.yaml", "system: [not: {closed");
        assert!(matches!(
            parse_pack_archive(&bytes).unwrap_err(),
            CoreError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn test_non_http_git_source_is_validation_error() {
        let resolver = StaticResolver::default();
        let pack = pack_with_source(PackSource::Git {
            repository: "git@forge.acme.io:packs/support.git".into(),
            revision: "main".into(),
        });
        let err = compile_pack(&pack, &resolver).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_oci_source_is_rejected_not_silently_empty() {
        let resolver = StaticResolver::default();
        let pack = pack_with_source(PackSource::Oci {
            image: "ghcr.io/acme/support-pack:1.0.0".into(),
        });
        let err = compile_pack(&pack, &resolver).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert!(err.to_string().contains("oci"));
    }
}
