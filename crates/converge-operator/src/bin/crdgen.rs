// Print every CRD manifest to stdout.
//
// Installation: cargo run --bin crdgen | kubectl apply -f -

use converge_operator::resources::{
    AgentRuntime, PromptPack, Provider, SessionRetentionPolicy, ToolRegistry, Workspace,
};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [
        serde_yaml::to_string(&AgentRuntime::crd())?,
        serde_yaml::to_string(&PromptPack::crd())?,
        serde_yaml::to_string(&ToolRegistry::crd())?,
        serde_yaml::to_string(&Provider::crd())?,
        serde_yaml::to_string(&Workspace::crd())?,
        serde_yaml::to_string(&SessionRetentionPolicy::crd())?,
    ];
    print!("{}", crds.join("---\n"));
    Ok(())
}
