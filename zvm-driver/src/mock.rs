//! Mock SMAPI client for testing and development.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

use crate::command::{CapturedOutput, CommandRunner};
use crate::error::{DriverError, Result};

/// Scripted reply for the next call of one SMAPI function.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Succeed with this stdout
    Stdout(String),
    /// Exit with a non-zero code
    Exit { code: i32, detail: String },
    /// Behave like a command that never finished
    Timeout,
}

#[derive(Default)]
struct MockState {
    api_level: String,
    /// userid -> directory entry text
    directory: HashMap<String, String>,
    logged_on: HashSet<String>,
    calls: Vec<Vec<String>>,
    scripted: HashMap<String, VecDeque<MockReply>>,
    delay: Option<Duration>,
}

/// Mock `smcli` runner.
///
/// This runner simulates a z/VM directory and guest power states in memory
/// without requiring a z/VM system. Useful for:
/// - Unit and integration testing
/// - Development on non-s390x hosts
///
/// Replies can be scripted per SMAPI function to inject failures.
pub struct MockSmcli {
    state: Mutex<MockState>,
}

impl MockSmcli {
    /// Create a mock reporting API functional level V6.3.
    pub fn new() -> Self {
        info!("Creating mock SMAPI client");
        Self {
            state: Mutex::new(MockState {
                api_level: "The API functional level is z/VM V6.3\n".to_string(),
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the calls made so far.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the `Query_API_Functional_Level` output.
    pub fn set_api_level_output(&self, output: impl Into<String>) {
        self.lock().api_level = output.into();
    }

    /// Queue a reply for the next call of `function`.
    pub fn push_reply(&self, function: &str, reply: MockReply) {
        self.lock()
            .scripted
            .entry(function.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Sleep this long inside every call.
    pub fn set_delay(&self, delay: Duration) {
        self.lock().delay = Some(delay);
    }

    /// Mark a guest logged off, as if it was shut down from inside.
    pub fn log_off(&self, userid: &str) {
        self.lock().logged_on.remove(userid);
    }

    /// All argument lists received so far.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.lock().calls.clone()
    }

    /// Number of calls of one SMAPI function.
    pub fn call_count(&self, function: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.first().map(String::as_str) == Some(function))
            .count()
    }

    /// Put an entry in the directory, as if defined outside the driver.
    pub fn seed_directory_entry(&self, userid: &str, entry: impl Into<String>) {
        self.lock().directory.insert(userid.to_string(), entry.into());
    }

    /// Directory entry handed over for `userid`, if any.
    pub fn directory_entry(&self, userid: &str) -> Option<String> {
        self.lock().directory.get(userid).cloned()
    }

    /// Whether `userid` is logged on.
    pub fn is_logged_on(&self, userid: &str) -> bool {
        self.lock().logged_on.contains(userid)
    }

    fn simulate(&self, state: &mut MockState, program: &Path, args: &[String]) -> Result<CapturedOutput> {
        let fail = |code: i32, detail: String| DriverError::ExternalCommandFailed {
            program: program.to_path_buf(),
            exit_code: Some(code),
            detail,
        };

        let function = args.first().map(String::as_str).unwrap_or("");
        let target = match (args.get(1).map(String::as_str), args.get(2)) {
            (Some("-T"), Some(target)) => target.clone(),
            _ => return Err(fail(4, format!("{}: missing -T target", function))),
        };

        match function {
            "Query_API_Functional_Level" => Ok(CapturedOutput::ok(state.api_level.clone())),
            "Image_Create_DM" => {
                if state.directory.contains_key(&target) {
                    return Err(fail(8, format!("RC=400 RS=8 Image {} already defined", target)));
                }
                let entry = match (args.get(3).map(String::as_str), args.get(4)) {
                    (Some("-f"), Some(file)) => std::fs::read_to_string(file)
                        .map_err(|e| fail(8, format!("cannot read {}: {}", file, e)))?,
                    _ => return Err(fail(4, "Image_Create_DM: missing -f".to_string())),
                };
                state.directory.insert(target.clone(), entry);
                Ok(CapturedOutput::ok(format!("Defining {} in the directory... Done\n", target)))
            }
            "Image_Activate" => {
                if !state.directory.contains_key(&target) {
                    return Err(fail(8, format!("RC=400 RS=4 Image {} not defined", target)));
                }
                state.logged_on.insert(target.clone());
                Ok(CapturedOutput::ok(format!("Activating {}... Done\n", target)))
            }
            "Image_Delete_DM" => {
                if state.directory.remove(&target).is_none() {
                    return Err(fail(8, format!("RC=400 RS=4 Image {} not defined", target)));
                }
                state.logged_on.remove(&target);
                Ok(CapturedOutput::ok(format!("Deleting {} from the directory... Done\n", target)))
            }
            "Image_Status_Query" => {
                if !state.directory.contains_key(&target) {
                    return Err(fail(8, format!("RC=400 RS=4 Image {} not defined", target)));
                }
                let power = if state.logged_on.contains(&target) { "on" } else { "off" };
                Ok(CapturedOutput::ok(format!("{}: {}\n", target, power)))
            }
            other => Err(fail(4, format!("unknown function {}", other))),
        }
    }
}

impl Default for MockSmcli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for MockSmcli {
    async fn run(&self, program: &Path, args: &[String]) -> Result<CapturedOutput> {
        let (delay, scripted) = {
            let mut state = self.lock();
            state.calls.push(args.to_vec());
            let function = args.first().cloned().unwrap_or_default();
            let scripted = state.scripted.get_mut(&function).and_then(|q| q.pop_front());
            (state.delay, scripted)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        debug!(?args, "Mock smcli call");

        match scripted {
            Some(MockReply::Stdout(stdout)) => Ok(CapturedOutput::ok(stdout)),
            Some(MockReply::Exit { code, detail }) => Err(DriverError::ExternalCommandFailed {
                program: program.to_path_buf(),
                exit_code: Some(code),
                detail,
            }),
            Some(MockReply::Timeout) => Err(DriverError::ExternalCommandTimeout {
                program: program.to_path_buf(),
                timeout: Duration::from_secs(0),
            }),
            None => {
                let mut state = self.lock();
                self.simulate(&mut state, program, args)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_directory_lifecycle() {
        let dir = TempDir::new().unwrap();
        let entry = dir.path().join("VM1.direct");
        std::fs::write(&entry, "USER VM1 AUTOONLY 32M 32M G\n").unwrap();
        let file = entry.to_string_lossy().to_string();

        let mock = MockSmcli::new();
        let smcli = Path::new("smcli");

        mock.run(smcli, &args(&["Image_Create_DM", "-T", "VM1", "-f", &file])).await.unwrap();
        assert!(mock.directory_entry("VM1").unwrap().starts_with("USER VM1"));

        // Creating the same user twice fails like SMAPI does.
        let err = mock.run(smcli, &args(&["Image_Create_DM", "-T", "VM1", "-f", &file])).await;
        assert!(matches!(err, Err(DriverError::ExternalCommandFailed { exit_code: Some(8), .. })));

        mock.run(smcli, &args(&["Image_Activate", "-T", "VM1"])).await.unwrap();
        let out = mock.run(smcli, &args(&["Image_Status_Query", "-T", "VM1"])).await.unwrap();
        assert_eq!(out.stdout, "VM1: on\n");

        mock.log_off("VM1");
        let out = mock.run(smcli, &args(&["Image_Status_Query", "-T", "VM1"])).await.unwrap();
        assert_eq!(out.stdout, "VM1: off\n");

        mock.run(smcli, &args(&["Image_Delete_DM", "-T", "VM1"])).await.unwrap();
        assert!(mock.directory_entry("VM1").is_none());
        assert_eq!(mock.call_count("Image_Status_Query"), 2);
    }

    #[tokio::test]
    async fn test_scripted_replies_run_once() {
        let mock = MockSmcli::new();
        let smcli = Path::new("smcli");
        mock.push_reply("Image_Activate", MockReply::Timeout);

        let first = mock.run(smcli, &args(&["Image_Activate", "-T", "VM1"])).await;
        assert!(matches!(first, Err(DriverError::ExternalCommandTimeout { .. })));

        // Queue drained: back to simulation, where VM1 is not defined.
        let second = mock.run(smcli, &args(&["Image_Activate", "-T", "VM1"])).await;
        assert!(matches!(second, Err(DriverError::ExternalCommandFailed { .. })));
    }
}
