//! Strata - command line front end
//!
//! Loads a project file and inspects or renders it:
//! `check` validates the layer tree, `info` prints a summary, `tree` lists
//! the layers and `render` writes the flattened image (or one layer) as PNG.

#![warn(missing_docs)]

mod logging_setup;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use strata_core::{
    check_integrity, Composition, EngineConfig, HolderRef, IssueSeverity, LayerId, LayerKind,
    LoadOptions,
};
use strata_io::{export_layer_png, export_png, load_project};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "strata")]
#[command(version, about = "Inspect and render Strata projects")]
struct Cli {
    /// Engine configuration (TOML); defaults apply when absent
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Treat filters that return their input as no-ops
    #[arg(long, global = true, default_value_t = false)]
    unattended: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the layer tree of a project
    Check {
        /// Project file (.strata, .ron or .json)
        project: PathBuf,
    },
    /// Print a summary of a project
    Info {
        /// Project file
        project: PathBuf,
    },
    /// Print the layer tree of a project
    Tree {
        /// Project file
        project: PathBuf,
    },
    /// Render a project (or one of its layers) to PNG
    Render {
        /// Project file
        project: PathBuf,
        /// Output PNG
        output: PathBuf,
        /// Render only the layer with this name
        #[arg(long)]
        layer: Option<String>,
    },
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(level) = &cli.log_level {
        config.log.level = level.clone();
    }
    if cli.unattended {
        config.unattended = true;
    }
    Ok(config)
}

fn open(project: &Path, config: &EngineConfig) -> Result<Composition> {
    let options = LoadOptions {
        config: config.clone(),
        ..Default::default()
    };
    load_project(project, options)
        .with_context(|| format!("Failed to load project {}", project.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let _log_guard = logging_setup::init(&config.log)?;

    match &cli.command {
        Command::Check { project } => {
            let comp = open(project, &config)?;
            let issues = check_integrity(&comp);
            for issue in &issues {
                println!("{:?}: {}", issue.severity, issue.message);
            }
            let errors = issues
                .iter()
                .filter(|i| i.severity == IssueSeverity::Error)
                .count();
            if errors > 0 {
                bail!("{} has {} structural errors", project.display(), errors);
            }
            println!("{}: OK ({} issues)", project.display(), issues.len());
        }
        Command::Info { project } => {
            let comp = open(project, &config)?;
            print!("{}", summary(&comp));
        }
        Command::Tree { project } => {
            let comp = open(project, &config)?;
            print!("{}", layer_tree(&comp)?);
        }
        Command::Render {
            project,
            output,
            layer,
        } => {
            let mut comp = open(project, &config)?;
            match layer {
                Some(name) => {
                    let id = comp
                        .find_layer(name)
                        .with_context(|| format!("No layer named '{}'", name))?;
                    export_layer_png(&mut comp, id, output)?;
                }
                None => export_png(&mut comp, output)?,
            }
            info!("Rendered {} to {}", project.display(), output.display());
        }
    }
    Ok(())
}

fn summary(comp: &Composition) -> String {
    let (width, height) = comp.canvas().dimensions();
    let mut out = String::new();
    let _ = writeln!(out, "Name:     {}", comp.name());
    let _ = writeln!(out, "Canvas:   {}x{}", width, height);
    let _ = writeln!(out, "Layers:   {} ({} at root)", comp.layer_count(), comp.root_layers().len());
    for pending in comp.pending_links() {
        let _ = writeln!(out, "Missing:  {}", pending.path.display());
    }
    out
}

fn layer_tree(comp: &Composition) -> Result<String> {
    let mut out = String::new();
    write_children(comp, HolderRef::Root, 0, &mut out)?;
    Ok(out)
}

fn write_children(
    comp: &Composition,
    holder: HolderRef,
    depth: usize,
    out: &mut String,
) -> Result<()> {
    // Top of the stack first, as layer panels show it
    for &id in comp.children(holder)?.iter().rev() {
        write_layer(comp, id, depth, out)?;
    }
    Ok(())
}

fn write_layer(comp: &Composition, id: LayerId, depth: usize, out: &mut String) -> Result<()> {
    let layer = comp.layer(id)?;
    let mut line = format!(
        "{}{} [{}] {} {:.0}%",
        "  ".repeat(depth),
        layer.name(),
        layer.kind().name(),
        layer.blend_mode().display_name(),
        layer.opacity() * 100.0
    );
    if !layer.is_visible() {
        line.push_str(" hidden");
    }
    if layer.mask().is_some() {
        line.push_str(" masked");
    }
    if let LayerKind::SmartObject(so) = layer.kind() {
        if let Some(link) = so.link() {
            let _ = write!(line, " -> {}", link.path.display());
        }
    }
    let _ = writeln!(out, "{}", line);
    if layer.kind().as_holder().is_some() {
        write_children(comp, HolderRef::Layer(id), depth + 1, out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::filter::Invert;
    use strata_core::Layer;

    #[test]
    fn test_layer_tree_lists_top_first() {
        let mut comp = Composition::new("doc", 2, 2);
        comp.add_layer(HolderRef::Root, Layer::group("bottom"))
            .unwrap();
        let so = comp
            .add_layer(
                HolderRef::Root,
                Layer::smart_object("top", Composition::new("inner", 2, 2)),
            )
            .unwrap();
        comp.add_smart_filter(so, "invert", Box::new(Invert)).unwrap();

        let tree = layer_tree(&comp).unwrap();
        let lines: Vec<&str> = tree.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("top ["));
        assert!(lines[1].starts_with("  invert ["));
        assert!(lines[2].starts_with("bottom ["));
    }

    #[test]
    fn test_summary() {
        let comp = Composition::new("poster", 640, 480);
        let text = summary(&comp);
        assert!(text.contains("poster"));
        assert!(text.contains("640x480"));
    }

    #[test]
    fn test_cli_parses_render() {
        let cli = Cli::parse_from([
            "strata",
            "--unattended",
            "render",
            "in.strata",
            "out.png",
            "--layer",
            "sky",
        ]);
        assert!(cli.unattended);
        match cli.command {
            Command::Render { layer, .. } => assert_eq!(layer.as_deref(), Some("sky")),
            other => panic!("unexpected command {:?}", other),
        }
    }
}
