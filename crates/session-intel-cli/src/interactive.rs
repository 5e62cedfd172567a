//! Terminal loop for one session.
//!
//! Reads questions line by line, shows the augmentation preview in learn
//! mode, forwards the final prompt and prints the reply. Input and output
//! are generic so tests can drive the loop from a byte slice.

use std::io::Write;
use std::time::Duration;

use anyhow::Result;
use session_intel_core::{
    is_exit_command, CloseReport, HumanChoice, SessionPipeline, TurnPreview,
};
use session_state::SessionMode;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::time::Instant;

/// Interval between "still waiting" lines while the assistant works.
const WAIT_NOTICE: Duration = Duration::from_secs(15);

const WELCOME: &str = "Session Intel\nType ':exit' to finish the session.";

pub struct Console<R, W> {
    input: R,
    out: W,
}

impl<R, W: Write> Console<R, W> {
    pub fn new(input: R, out: W) -> Self {
        Self { input, out }
    }

    #[cfg(test)]
    fn into_output(self) -> W {
        self.out
    }

    fn say(&mut self, text: impl AsRef<str>) -> Result<()> {
        writeln!(self.out, "{}", text.as_ref())?;
        Ok(())
    }
}

impl<R, W> Console<R, W>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    /// Print `prompt` and read one line. `None` on end of input.
    async fn ask(&mut self, prompt: &str) -> Result<Option<String>> {
        write!(self.out, "{prompt}")?;
        self.out.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

/// Answer to the `[Y/n/e]` confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Accept,
    Reject,
    Edit,
    Exit,
}

/// Parse a confirmation answer. An empty answer accepts.
pub fn parse_confirmation(raw: &str) -> Option<Confirmation> {
    let answer = raw.trim().to_lowercase();
    match answer.as_str() {
        "" | "y" | "yes" => Some(Confirmation::Accept),
        "n" | "no" => Some(Confirmation::Reject),
        "e" | "edit" => Some(Confirmation::Edit),
        other if is_exit_command(other) => Some(Confirmation::Exit),
        _ => None,
    }
}

/// Run the interactive loop until an exit command or end of input, then
/// close the session.
pub async fn run_session<R, W>(
    pipeline: &mut SessionPipeline,
    console: &mut Console<R, W>,
    assistant_label: &str,
) -> Result<CloseReport>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    console.say(WELCOME)?;
    console.say(format!("Mode: {}", pipeline.mode()))?;
    console.say(format!("Session ID: {}\n", pipeline.session_id()))?;
    show_recap(pipeline, console)?;
    flush_notices(pipeline, console)?;

    loop {
        let Some(line) = console.ask("You> ").await? else {
            console.say("\nExiting...")?;
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if is_exit_command(input) {
            break;
        }

        let preview = pipeline.prepare_turn(input).await;
        flush_notices(pipeline, console)?;

        let choice = if preview.requires_confirmation {
            show_preview(&preview, console)?;
            match confirm(console).await? {
                Some(choice) => choice,
                None => {
                    console.say("Ending session...")?;
                    break;
                }
            }
        } else {
            HumanChoice::Accept
        };

        let final_text = match &choice {
            HumanChoice::Accept => preview.augmentation.suggestion.as_str(),
            HumanChoice::Reject => preview.original.as_str(),
            HumanChoice::Edit(text) => text.as_str(),
        };
        if final_text.trim().is_empty() {
            console.say("Skipping turn due to empty prompt.")?;
            continue;
        }

        let started = Instant::now();
        let outcome = {
            let submit = pipeline.submit_turn(&preview, choice);
            tokio::pin!(submit);
            let mut ticker = tokio::time::interval_at(started + WAIT_NOTICE, WAIT_NOTICE);
            loop {
                tokio::select! {
                    outcome = &mut submit => break outcome,
                    _ = ticker.tick() => {
                        console.say(format!(
                            "... still waiting on {assistant_label} ({}s elapsed)",
                            started.elapsed().as_secs()
                        ))?;
                    }
                }
            }
        };

        let elapsed = started.elapsed();
        if elapsed >= WAIT_NOTICE {
            console.say(format!(
                "({assistant_label} responded in {:.1}s)",
                elapsed.as_secs_f64()
            ))?;
        }
        for line in &outcome.reply.reasoning {
            console.say(format!("(thinking) {line}"))?;
        }
        console.say(format!("{assistant_label}> {}\n", outcome.reply.text))?;
        flush_notices(pipeline, console)?;
    }

    let report = pipeline.finalize().await;
    if report.summary.is_some() {
        console.say("Session summary appended to learnings.md")?;
    } else {
        console.say("Skipped summary (missing OpenAI configuration?).")?;
    }
    flush_notices(pipeline, console)?;
    Ok(report)
}

/// Ask until the answer is understood. `None` means the human asked to exit.
async fn confirm<R, W>(console: &mut Console<R, W>) -> Result<Option<HumanChoice>>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    loop {
        let Some(raw) = console.ask("Use augmented prompt? [Y/n/e]: ").await? else {
            return Ok(None);
        };
        match parse_confirmation(&raw) {
            Some(Confirmation::Accept) => return Ok(Some(HumanChoice::Accept)),
            Some(Confirmation::Reject) => return Ok(Some(HumanChoice::Reject)),
            Some(Confirmation::Exit) => return Ok(None),
            Some(Confirmation::Edit) => {
                let Some(edited) = console.ask("Enter revised prompt: ").await? else {
                    return Ok(None);
                };
                let edited = edited.trim();
                if !edited.is_empty() {
                    return Ok(Some(HumanChoice::Edit(edited.to_string())));
                }
                console.say("Edited prompt was empty; keeping original preview.")?;
            }
            None => {
                console.say("Please enter 'y', 'n', 'e', or an exit command like ':exit'.")?;
            }
        }
    }
}

fn show_recap<R, W: Write>(pipeline: &SessionPipeline, console: &mut Console<R, W>) -> Result<()> {
    if pipeline.mode() != SessionMode::Learn {
        return Ok(());
    }
    if let Some(recap) = pipeline.recap() {
        console.say(format!("Loaded prior session: {}", recap.session_id))?;
        console.say(format!("\n--- Previous Session ---\n{}", recap.render_context()))?;
    }
    Ok(())
}

fn show_preview<R, W: Write>(preview: &TurnPreview, console: &mut Console<R, W>) -> Result<()> {
    let augmentation = &preview.augmentation;
    console.say("\n--- Augmentation Preview ---")?;
    console.say(format!("Original:\n{}", preview.original))?;
    console.say(format!("\nAugmented:\n{}", augmentation.suggestion))?;
    if !augmentation.diff.is_empty() {
        console.say(format!("\nDiff:\n{}", augmentation.diff.trim_end()))?;
    }
    if !augmentation.justification.is_empty() {
        console.say("\nJustification:")?;
        for item in &augmentation.justification {
            console.say(format!("- {item}"))?;
        }
    }
    Ok(())
}

fn flush_notices<R, W: Write>(
    pipeline: &mut SessionPipeline,
    console: &mut Console<R, W>,
) -> Result<()> {
    for notice in pipeline.take_notices() {
        console.say(format!("[notice] {notice}"))?;
    }
    Ok(())
}
