use crate::commands::edit::Destination;
use crate::util::{CliResult, emit, ensure_success, load};
use clap::{Args, ValueEnum};
use std::path::PathBuf;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, ValueEnum)]
pub enum MergeMode {
    /// One destination match merges into it, several into each.
    #[default]
    Auto,
    /// Everything goes below the first destination match.
    One,
    /// Every destination match receives a copy.
    Each,
}

#[derive(Args, Debug, Clone)]
pub struct MergeArgs {
    /// Document the nodes are copied from.
    #[arg(value_name = "SRC")]
    pub src: PathBuf,
    #[arg(value_name = "SRC_XPATH")]
    pub src_expression: String,
    /// Document that receives the copies; the result is written from here.
    #[arg(value_name = "DST")]
    pub dst: PathBuf,
    #[arg(value_name = "DST_XPATH")]
    pub dst_expression: String,
    #[arg(long = "mode", value_enum, default_value_t = MergeMode::Auto)]
    pub mode: MergeMode,
    #[command(flatten)]
    pub destination: Destination,
}

pub fn run(args: &MergeArgs) -> CliResult<String> {
    let mut src = load(&args.src)?;
    let mut dst = load(&args.dst)?;
    let merge = match args.mode {
        MergeMode::Auto => xmlctx_core::merge,
        MergeMode::One => xmlctx_core::merge_into_one,
        MergeMode::Each => xmlctx_core::merge_into_each,
    };
    let state = merge(&mut src, &args.src_expression, &mut dst, &args.dst_expression);
    tracing::debug!(mode = ?args.mode, %state, "merged documents");
    ensure_success(state, "merge")?;
    let target = if args.destination.in_place { Some(args.dst.as_path()) } else { args.destination.output.as_deref() };
    emit(&mut dst, target)
}
