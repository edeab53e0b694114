//! Diagram of the agent state machine

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use tracing::{info, instrument, warn};

pub const START: &str = "__start__";
pub const END: &str = "__end__";
pub const CHATBOT: &str = "chatbot";
pub const TOOLS: &str = "tools";

const MERMAID_FILE: &str = "chat_graph.mmd";
const PNG_FILE: &str = "chat_graph.png";
const RENDER_URL: &str = "https://mermaid.ink/img";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub from: &'static str,
    pub to: &'static str,
    /// Set for conditional edges
    pub label: Option<&'static str>,
}

/// Node and edge structure of a compiled loop
#[derive(Debug, Clone)]
pub struct AgentGraph {
    pub nodes: Vec<&'static str>,
    pub edges: Vec<Edge>,
}

/// Files written by [`AgentGraph::export`]
#[derive(Debug, Default)]
pub struct ExportedFiles {
    pub mermaid: Option<PathBuf>,
    pub png: Option<PathBuf>,
}

impl AgentGraph {
    /// The chatbot/tools cycle
    pub fn agent() -> Self {
        let edge = |from: &'static str, to: &'static str, label: Option<&'static str>| Edge { from, to, label };
        Self {
            nodes: vec![START, CHATBOT, TOOLS, END],
            edges: vec![
                edge(START, CHATBOT, None),
                edge(CHATBOT, TOOLS, Some("tool_calls")),
                edge(CHATBOT, END, Some("answer")),
                edge(TOOLS, CHATBOT, None),
            ],
        }
    }

    /// Mermaid flowchart text
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("%%{init: {'flowchart': {'curve': 'linear'}}}%%\ngraph TD;\n");
        for node in &self.nodes {
            let _ = match *node {
                START | END => writeln!(out, "\t{}([<p>{}</p>]):::first", node, node),
                _ => writeln!(out, "\t{}({})", node, node),
            };
        }
        for edge in &self.edges {
            let _ = match edge.label {
                Some(label) => writeln!(out, "\t{} -. &nbsp;{}&nbsp; .-> {};", edge.from, label, edge.to),
                None => writeln!(out, "\t{} --> {};", edge.from, edge.to),
            };
        }
        out.push_str("\tclassDef default fill:#f2f0ff,line-height:1.2\n");
        out.push_str("\tclassDef first fill-opacity:0\n");
        out
    }

    /// Short text description for the terminal
    pub fn describe(&self) -> String {
        let mut out = format!("Nodes: {}\n", self.nodes.join(", "));
        for edge in &self.edges {
            let _ = match edge.label {
                Some(label) => writeln!(out, "  {} --[{}]--> {}", edge.from, label, edge.to),
                None => writeln!(out, "  {} --> {}", edge.from, edge.to),
            };
        }
        out
    }

    /// Write the diagram into `dir`. Failures are logged, never returned.
    #[instrument(skip(self))]
    pub async fn export(&self, dir: &Path, png: bool) -> ExportedFiles {
        let mut files = ExportedFiles::default();
        let mermaid = self.to_mermaid();

        let mmd_path = dir.join(MERMAID_FILE);
        match std::fs::write(&mmd_path, &mermaid) {
            Ok(()) => {
                info!(path = %mmd_path.display(), "Wrote Mermaid diagram");
                files.mermaid = Some(mmd_path);
            }
            Err(e) => warn!(path = %mmd_path.display(), error = %e, "Failed to write Mermaid diagram"),
        }

        if png {
            let png_path = dir.join(PNG_FILE);
            match render_png(&mermaid, &png_path).await {
                Ok(()) => {
                    info!(path = %png_path.display(), "Wrote PNG diagram");
                    files.png = Some(png_path);
                }
                Err(e) => warn!(error = %format!("{:#}", e), "PNG export failed; the .mmd file can be viewed at https://mermaid.live"),
            }
        }

        files
    }
}

fn render_url(mermaid: &str) -> String {
    format!("{}/{}?type=png", RENDER_URL, URL_SAFE.encode(mermaid))
}

async fn render_png(mermaid: &str, path: &Path) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()
        .context("Failed to create HTTP client")?;

    let response = client
        .get(render_url(mermaid))
        .send()
        .await
        .context("Diagram render request failed")?
        .error_for_status()
        .context("Diagram render service returned an error")?;

    let bytes = response.bytes().await.context("Failed to read rendered diagram")?;
    std::fs::write(path, &bytes).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
