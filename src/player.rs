use std::process::{Command, Stdio};

use anyhow::{anyhow, Context, Result};
use tracing::info;

const URL_PLACEHOLDER: &str = "%URL%";

/// Expands the configured player command for `url`. When no argument holds
/// the placeholder the URL is appended.
pub fn player_args(template: &[String], url: &str) -> Result<(String, Vec<String>)> {
    let Some((program, rest)) = template.split_first() else {
        return Err(anyhow!("player: command not configured"));
    };
    if program.trim().is_empty() {
        return Err(anyhow!("player: command not configured"));
    }
    let mut substituted = false;
    let mut args: Vec<String> = rest
        .iter()
        .map(|arg| {
            if arg.contains(URL_PLACEHOLDER) {
                substituted = true;
                arg.replace(URL_PLACEHOLDER, url)
            } else {
                arg.clone()
            }
        })
        .collect();
    if !substituted {
        args.push(url.to_string());
    }
    Ok((program.clone(), args))
}

pub fn spawn_external_player(template: &[String], url: &str) -> Result<()> {
    if url.trim().is_empty() {
        return Err(anyhow!("player: playback url missing"));
    }
    let (program, args) = player_args(template, url)?;
    let mut command = Command::new(&program);
    command.args(&args);
    command.stdin(Stdio::null());
    command.stdout(Stdio::null());
    command.stderr(Stdio::null());
    command
        .spawn()
        .with_context(|| format!("launch {program} for {url}"))?;
    info!(%program, "external player started");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn replaces_placeholder() {
        let (program, args) =
            player_args(&template(&["mpv", "--fs", "%URL%"]), "https://x/v.mp4").unwrap();
        assert_eq!(program, "mpv");
        assert_eq!(args, vec!["--fs", "https://x/v.mp4"]);
    }

    #[test]
    fn appends_when_no_placeholder() {
        let (_, args) = player_args(&template(&["vlc"]), "https://x/v.mp4").unwrap();
        assert_eq!(args, vec!["https://x/v.mp4"]);
    }

    #[test]
    fn empty_command_is_an_error() {
        assert!(player_args(&[], "u").is_err());
        assert!(player_args(&template(&[" "]), "u").is_err());
    }
}
