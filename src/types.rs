use std::str::FromStr;
use serde::Deserialize;

/// Which transport carries a command invocation.
///
/// - `Process`: spawn the tool locally and read its standard streams.
/// - `Remote`: post the command line to a long-lived local daemon and read
///   its streamed response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Process,
    Remote,
}

impl Default for ChannelKind {
    fn default() -> Self {
        ChannelKind::Process
    }
}

impl FromStr for ChannelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "process" => Ok(ChannelKind::Process),
            "remote" => Ok(ChannelKind::Remote),
            other => Err(format!(
                "invalid channel: {other} (expected \"process\" or \"remote\")"
            )),
        }
    }
}
