use clap::Parser;
use mixforge_tools::{expand_grid, GridSpec, Shell, ToolConfig};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Expand a base run config against parameter grids"
)]
struct Args {
    /// Grid spec JSON (base config path, model_var/run_var axes, abbreviations).
    #[arg(long)]
    spec: PathBuf,
    /// Output directory for generated configs and the launch script.
    #[arg(long, default_value = "grids")]
    out: PathBuf,
    /// Shell dialect for the launch script.
    #[arg(long, value_enum, default_value_t = Shell::Bash)]
    shell: Shell,
    /// Optional mixforge-tools.toml override.
    #[arg(long)]
    tools_config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let spec = GridSpec::load(&args.spec)?;
    let tool_cfg = match &args.tools_config {
        Some(path) => ToolConfig::load_from(path),
        None => ToolConfig::load(),
    };
    let summary = expand_grid(&spec, &tool_cfg, args.shell, &args.out)?;
    println!(
        "wrote {} configs and {}; review the script before launching",
        summary.configs.len(),
        summary.script.display()
    );
    Ok(())
}
