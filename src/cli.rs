//! Hand-rolled argument parsing for `rcedit`'s flag grammar.
//!
//! The grammar (one positional file path, then freely-ordered flags, some of which print and
//! exit immediately) doesn't map onto `argp`'s derive-a-subcommand-struct style, so the CLI parses
//! its own `Vec<String>` instead, matching the original tool's hand-rolled `wmain` loop.

use snafu::prelude::*;
use std::path::PathBuf;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("unrecognized option: {option}"))]
    UnknownOption { option: String },
    #[snafu(display("{option} requires {expected} argument(s)"))]
    MissingArgument { option: String, expected: usize },
    #[snafu(display("{value} is not a valid version (expected v1[.v2[.v3[.v4]]])"))]
    BadVersion { value: String },
    #[snafu(display("{value} is not a valid resource id"))]
    BadResourceId { value: String },
    #[snafu(display("you should specify an exe/dll file"))]
    MissingFile,
    #[snafu(display("unexpected trailing arguments after {file}"))]
    TrailingFile { file: String },
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, Clone)]
pub enum Action {
    SetVersionString { key: String, value: String },
    GetVersionString { key: String },
    SetFileVersion { v1: u16, v2: u16, v3: u16, v4: u16 },
    SetProductVersion { v1: u16, v2: u16, v3: u16, v4: u16 },
    SetIcon { path: PathBuf },
    SetRequestedExecutionLevel { level: String },
    SetApplicationManifest { path: PathBuf },
    SetResourceString { id: u16, value: String },
    GetResourceString { id: u16 },
    SetRcdata { id: u16, path: PathBuf },
}

pub struct ParsedArgs {
    pub file: PathBuf,
    pub verbose: usize,
    pub help: bool,
    pub actions: Vec<Action>,
}

pub const USAGE: &str = "\
Usage: rcedit <file> [options ...]

Options:
  -h, --help                              print this message and exit
  -svs, --set-version-string KEY VALUE    set/append a version string
  -gvs, --get-version-string KEY          print a version string and exit
  -sfv, --set-file-version V              set FixedFileInfo file version (v1[.v2[.v3[.v4]]])
  -spv, --set-product-version V           set FixedFileInfo product version
  -si, --set-icon PATH                    replace the first icon bundle with PATH
  -srel, --set-requested-execution-level LEVEL
                                           asInvoker|highestAvailable|requireAdministrator
  -am, --application-manifest PATH        replace the manifest wholesale
  --srs, --set-resource-string ID VALUE   set an RT_STRING slot
  -grs, --get-resource-string ID          print an RT_STRING slot and exit
  --set-rcdata ID PATH                    replace an RT_RCDATA entry with PATH's contents
  -v                                      increase verbosity (repeatable)
";

fn parse_version(value: &str) -> Result<(u16, u16, u16, u16)> {
    let mut parts = value.split('.');
    let mut next = || -> Result<u16> {
        match parts.next() {
            Some(part) if !part.is_empty() => {
                part.parse().ok().context(BadVersionSnafu { value })
            }
            _ => Ok(0),
        }
    };
    let v1 = next()?;
    let v2 = next()?;
    let v3 = next()?;
    let v4 = next()?;
    ensure!(parts.next().is_none(), BadVersionSnafu { value });
    Ok((v1, v2, v3, v4))
}

fn parse_resource_id(value: &str) -> Result<u16> {
    value.parse().ok().context(BadResourceIdSnafu { value })
}

/// Parses `args` (excluding the program name). Validates the entire shape before any I/O, matching
/// the original tool's "reject malformed flags before touching the file" behavior.
pub fn parse(args: &[String]) -> Result<ParsedArgs> {
    let mut file = None;
    let mut verbose = 0usize;
    let mut help = false;
    let mut actions = Vec::new();

    let mut i = 0;
    let take = |i: &mut usize, option: &str, count: usize| -> Result<Vec<String>> {
        ensure!(args.len() - *i > count, MissingArgumentSnafu { option: option.to_string(), expected: count });
        let values = args[*i + 1..=*i + count].to_vec();
        *i += count;
        Ok(values)
    };

    while i < args.len() {
        let arg = args[i].as_str();
        match arg {
            "-h" | "--help" => help = true,
            "-v" => verbose += 1,
            "-svs" | "--set-version-string" => {
                let values = take(&mut i, arg, 2)?;
                actions.push(Action::SetVersionString { key: values[0].clone(), value: values[1].clone() });
            }
            "-gvs" | "--get-version-string" => {
                let values = take(&mut i, arg, 1)?;
                actions.push(Action::GetVersionString { key: values[0].clone() });
            }
            "-sfv" | "--set-file-version" => {
                let values = take(&mut i, arg, 1)?;
                let (v1, v2, v3, v4) = parse_version(&values[0])?;
                actions.push(Action::SetFileVersion { v1, v2, v3, v4 });
            }
            "-spv" | "--set-product-version" => {
                let values = take(&mut i, arg, 1)?;
                let (v1, v2, v3, v4) = parse_version(&values[0])?;
                actions.push(Action::SetProductVersion { v1, v2, v3, v4 });
            }
            "-si" | "--set-icon" => {
                let values = take(&mut i, arg, 1)?;
                actions.push(Action::SetIcon { path: PathBuf::from(&values[0]) });
            }
            "-srel" | "--set-requested-execution-level" => {
                let values = take(&mut i, arg, 1)?;
                actions.push(Action::SetRequestedExecutionLevel { level: values[0].clone() });
            }
            "-am" | "--application-manifest" => {
                let values = take(&mut i, arg, 1)?;
                actions.push(Action::SetApplicationManifest { path: PathBuf::from(&values[0]) });
            }
            "--srs" | "--set-resource-string" => {
                let values = take(&mut i, arg, 2)?;
                let id = parse_resource_id(&values[0])?;
                actions.push(Action::SetResourceString { id, value: values[1].clone() });
            }
            "-grs" | "--get-resource-string" => {
                let values = take(&mut i, arg, 1)?;
                let id = parse_resource_id(&values[0])?;
                actions.push(Action::GetResourceString { id });
            }
            "--set-rcdata" => {
                let values = take(&mut i, arg, 2)?;
                let id = parse_resource_id(&values[0])?;
                actions.push(Action::SetRcdata { id, path: PathBuf::from(&values[1]) });
            }
            _ if arg.starts_with('-') => {
                return UnknownOptionSnafu { option: arg.to_string() }.fail();
            }
            _ => {
                ensure!(file.is_none(), TrailingFileSnafu { file: arg.to_string() });
                file = Some(PathBuf::from(arg));
            }
        }
        i += 1;
    }

    if help {
        return Ok(ParsedArgs { file: file.unwrap_or_default(), verbose, help, actions });
    }

    let file = file.context(MissingFileSnafu)?;
    Ok(ParsedArgs { file, verbose, help, actions })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn parses_a_single_set_version_string() {
        let parsed = parse(&args(&["app.exe", "-svs", "ProductName", "Example"])).unwrap();
        assert_eq!(parsed.file, PathBuf::from("app.exe"));
        assert!(matches!(&parsed.actions[0], Action::SetVersionString { key, value } if key == "ProductName" && value == "Example"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = parse(&args(&["-svs", "k", "v"])).unwrap_err();
        assert!(matches!(err, Error::MissingFile));
    }

    #[test]
    fn missing_argument_is_reported() {
        let err = parse(&args(&["app.exe", "-svs", "k"])).unwrap_err();
        assert!(matches!(err, Error::MissingArgument { .. }));
    }

    #[test]
    fn trailing_positional_after_file_is_rejected() {
        let err = parse(&args(&["app.exe", "other.exe"])).unwrap_err();
        assert!(matches!(err, Error::TrailingFile { .. }));
    }

    #[test]
    fn parses_a_partial_version_string() {
        let parsed = parse(&args(&["app.exe", "-sfv", "1.2"])).unwrap();
        assert!(matches!(&parsed.actions[0], Action::SetFileVersion { v1: 1, v2: 2, v3: 0, v4: 0 }));
    }

    #[test]
    fn unknown_option_is_rejected() {
        let err = parse(&args(&["app.exe", "--nonsense"])).unwrap_err();
        assert!(matches!(err, Error::UnknownOption { .. }));
    }
}
