//! Command-line parsing.
//!
//! Options come first; everything after the first non-option (or `--`) is
//! the pipeline, with stages separated by a literal `|` argument:
//!
//! ```text
//! execpipe -s test123 -- cat '|' md5sum
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// What the command line asks for.
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Help,
    Version,
    Run(Options),
}

/// Where pipeline input comes from.
#[derive(Debug, Default, PartialEq, Eq)]
pub enum InputArg {
    #[default]
    None,
    File(PathBuf),
    String(String),
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Options {
    pub input: InputArg,
    pub output: Option<PathBuf>,
    pub digest: bool,
    pub search_path: bool,
    pub env: Vec<(String, String)>,
    pub config: Option<PathBuf>,
    pub verbosity: u8,
    pub json: bool,
    /// Program and arguments of each stage, in order.
    pub stages: Vec<Vec<String>>,
}

/// Parse `args` (without the program name).
pub fn parse(args: &[String]) -> Result<Command> {
    let mut opts = Options {
        search_path: true,
        ..Options::default()
    };

    let mut i = 0;
    while let Some(arg) = args.get(i) {
        match arg.as_str() {
            "-h" | "--help" => return Ok(Command::Help),
            "-V" | "--version" => return Ok(Command::Version),
            "--" => {
                i += 1;
                break;
            }
            "-i" | "--input" => {
                let path = value(args, &mut i, arg)?;
                opts.input = InputArg::File(path.into());
            }
            "-s" | "--string" => {
                let text = value(args, &mut i, arg)?;
                opts.input = InputArg::String(text.to_string());
            }
            "-o" | "--output" => opts.output = Some(value(args, &mut i, arg)?.into()),
            "-e" | "--env" => {
                let pair = value(args, &mut i, arg)?;
                let (key, val) = pair
                    .split_once('=')
                    .with_context(|| format!("{arg} expects KEY=VALUE, got '{pair}'"))?;
                opts.env.push((key.to_string(), val.to_string()));
            }
            "--config" => opts.config = Some(value(args, &mut i, arg)?.into()),
            "--digest" => opts.digest = true,
            "--no-path" => opts.search_path = false,
            "--json" => opts.json = true,
            v if v.len() > 1 && v.starts_with('-') && v[1..].bytes().all(|b| b == b'v') => {
                opts.verbosity = opts.verbosity.saturating_add((v.len() - 1) as u8);
            }
            "--verbose" => opts.verbosity = opts.verbosity.saturating_add(1),
            unknown if unknown.starts_with('-') => {
                bail!("unknown option: {unknown}");
            }
            _ => break,
        }
        i += 1;
    }

    opts.stages = split_stages(&args[i.min(args.len())..])?;
    Ok(Command::Run(opts))
}

fn value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> Result<&'a str> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .with_context(|| format!("{flag} requires an argument"))
}

/// Split `cat -n | sort | uniq` into stages.
fn split_stages(words: &[String]) -> Result<Vec<Vec<String>>> {
    if words.is_empty() {
        bail!("no pipeline given");
    }
    let stages: Vec<Vec<String>> = words
        .split(|w| w == "|")
        .map(<[String]>::to_vec)
        .collect();
    if let Some(pos) = stages.iter().position(Vec::is_empty) {
        bail!("stage {} is empty", pos + 1);
    }
    Ok(stages)
}
