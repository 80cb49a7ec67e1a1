use std::io::{self, BufRead, IsTerminal, Write};

use crate::error::{NodeError, Result};

/// Source of operator answers: confirmations and pasted certificates.
pub trait InputProvider {
    /// Whether a human can be asked questions.
    fn is_interactive(&self) -> bool;

    fn confirm(&self, prompt: &str, default: bool) -> Result<bool>;

    /// Read a PEM certificate block from the operator.
    fn read_certificate(&self) -> Result<String>;
}

/// Prompts on the controlling terminal. With `assume_yes` every confirmation
/// is accepted and nothing is read.
#[derive(Debug, Clone, Copy)]
pub struct TerminalInput {
    assume_yes: bool,
}

impl TerminalInput {
    pub fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }

    fn read_line(&self) -> Result<Option<String>> {
        let mut line = String::new();
        let read = io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|e| NodeError::InvalidInput(format!("Failed to read input: {}", e)))?;
        Ok((read > 0).then_some(line))
    }
}

impl InputProvider for TerminalInput {
    fn is_interactive(&self) -> bool {
        !self.assume_yes && io::stdin().is_terminal()
    }

    fn confirm(&self, prompt: &str, default: bool) -> Result<bool> {
        if self.assume_yes {
            return Ok(true);
        }
        if !io::stdin().is_terminal() {
            return Ok(default);
        }

        print!("{} {} ", prompt, if default { "[Y/n]" } else { "[y/N]" });
        io::stdout().flush().ok();

        let answer = self.read_line()?.unwrap_or_default();
        Ok(match answer.trim().to_lowercase().as_str() {
            "" => default,
            "y" | "yes" => true,
            _ => false,
        })
    }

    fn read_certificate(&self) -> Result<String> {
        if !self.is_interactive() {
            return Err(NodeError::InvalidCertificate(
                "no certificate given (use --cert or --cert-content)".to_string(),
            ));
        }

        println!("📜 Paste the panel client certificate, ending with the END CERTIFICATE line:");
        let mut pem = String::new();
        while let Some(line) = self.read_line()? {
            pem.push_str(&line);
            if line.contains("END CERTIFICATE") {
                break;
            }
        }
        Ok(pem)
    }
}
