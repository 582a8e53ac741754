//! SMAPI client wrapper.
//!
//! z/VM is managed through the Systems Management API. `smcli` exposes each
//! API function as `smcli <Function> -T <target> [options]`; this module
//! fixes those argument conventions and parses the handful of outputs the
//! driver depends on.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::command::{CapturedOutput, CommandRunner};
use crate::error::{DriverError, Result};

/// Reason code SMAPI reports for a user ID missing from the directory.
const RS_IMAGE_NOT_DEFINED: &str = "RS=4";

/// Power state reported by `Image_Status_Query`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStatus {
    /// The guest is logged on
    On,
    /// The guest is logged off
    Off,
}

/// Typed front-end for the SMAPI command-line client.
#[derive(Clone)]
pub struct Smcli {
    runner: Arc<dyn CommandRunner>,
    program: PathBuf,
    host_target: String,
}

impl Smcli {
    /// Create a client that runs `program` through `runner`.
    ///
    /// `host_target` is the SMAPI server used for host-level queries.
    pub fn new(runner: Arc<dyn CommandRunner>, program: impl Into<PathBuf>, host_target: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
            host_target: host_target.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    async fn call(&self, function: &str, target: &str, extra: &[String]) -> Result<CapturedOutput> {
        let mut args = vec![function.to_string(), "-T".to_string(), target.to_string()];
        args.extend_from_slice(extra);
        self.runner.run(&self.program, &args).await
    }

    /// `Query_API_Functional_Level`: raw output for the version probe.
    #[instrument(skip(self))]
    pub async fn query_api_level(&self) -> Result<String> {
        let out = self.call("Query_API_Functional_Level", &self.host_target, &[]).await?;
        Ok(out.stdout)
    }

    /// `Image_Create_DM`: add the directory entry in `entry_file` for `userid`.
    #[instrument(skip(self), fields(entry_file = %entry_file.display()))]
    pub async fn image_create(&self, userid: &str, entry_file: &Path) -> Result<()> {
        let extra = vec!["-f".to_string(), entry_file.to_string_lossy().into_owned()];
        self.call("Image_Create_DM", userid, &extra).await?;
        info!(userid = %userid, "Directory entry created");
        Ok(())
    }

    /// `Image_Activate`: log the guest on.
    #[instrument(skip(self))]
    pub async fn image_activate(&self, userid: &str) -> Result<()> {
        self.call("Image_Activate", userid, &[]).await?;
        info!(userid = %userid, "Image activated");
        Ok(())
    }

    /// `Image_Delete_DM`: remove the directory entry.
    #[instrument(skip(self))]
    pub async fn image_delete(&self, userid: &str) -> Result<()> {
        self.call("Image_Delete_DM", userid, &[]).await?;
        info!(userid = %userid, "Directory entry deleted");
        Ok(())
    }

    /// `Image_Status_Query`: whether the guest is logged on.
    #[instrument(skip(self))]
    pub async fn image_status(&self, userid: &str) -> Result<ImageStatus> {
        let out = self.call("Image_Status_Query", userid, &[]).await?;
        let status = parse_image_status(userid, &out.stdout)?;
        debug!(userid = %userid, ?status, "Image status queried");
        Ok(status)
    }

    /// Whether the directory holds an entry for `userid`.
    pub async fn image_exists(&self, userid: &str) -> Result<bool> {
        match self.image_status(userid).await {
            Ok(_) => Ok(true),
            Err(e) if reports_not_defined(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// `Image_Delete_DM`, treating an already missing entry as deleted.
    pub async fn image_delete_if_present(&self, userid: &str) -> Result<()> {
        match self.image_delete(userid).await {
            Err(e) if reports_not_defined(&e) => {
                debug!(userid = %userid, "Directory entry already absent");
                Ok(())
            }
            other => other,
        }
    }
}

/// Whether a failed SMAPI call says the image is not in the directory.
pub fn reports_not_defined(err: &DriverError) -> bool {
    match err {
        DriverError::ExternalCommandFailed { detail, .. } => {
            detail.split_whitespace().any(|word| word == RS_IMAGE_NOT_DEFINED)
        }
        _ => false,
    }
}

/// Parse `<USERID>: on|off`.
pub fn parse_image_status(userid: &str, output: &str) -> Result<ImageStatus> {
    let line = output.trim();
    let value = line
        .strip_prefix(userid)
        .and_then(|rest| rest.strip_prefix(':'))
        .map(str::trim)
        .ok_or_else(|| DriverError::UnexpectedOutputFormat(format!(
            "expected '{}: on|off', got '{}'", userid, line
        )))?;

    match value {
        "on" => Ok(ImageStatus::On),
        "off" => Ok(ImageStatus::Off),
        other => Err(DriverError::UnexpectedOutputFormat(format!(
            "unknown status '{}' for {}", other, userid
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockReply, MockSmcli};
    use tempfile::TempDir;

    #[test]
    fn test_parse_image_status() {
        assert_eq!(parse_image_status("VM1", "VM1: on\n").unwrap(), ImageStatus::On);
        assert_eq!(parse_image_status("VM1", "VM1: off").unwrap(), ImageStatus::Off);
        assert!(matches!(
            parse_image_status("VM1", "VM2: on"),
            Err(DriverError::UnexpectedOutputFormat(_))
        ));
        assert!(matches!(
            parse_image_status("VM1", "VM1: dormant"),
            Err(DriverError::UnexpectedOutputFormat(_))
        ));
    }

    #[tokio::test]
    async fn test_argument_conventions() {
        let dir = TempDir::new().unwrap();
        let entry = dir.path().join("VM1.direct");
        std::fs::write(&entry, "USER VM1 AUTOONLY 32M 32M G\n").unwrap();
        let entry_arg = entry.to_string_lossy().to_string();

        let mock = Arc::new(MockSmcli::new());
        let smcli = Smcli::new(mock.clone(), "/opt/zhcp/bin/smcli", "zhcp");

        smcli.query_api_level().await.unwrap();
        smcli.image_create("VM1", &entry).await.unwrap();
        smcli.image_activate("VM1").await.unwrap();
        assert_eq!(smcli.image_status("VM1").await.unwrap(), ImageStatus::On);

        let calls = mock.calls();
        assert_eq!(calls[0], vec!["Query_API_Functional_Level", "-T", "zhcp"]);
        assert_eq!(calls[1], vec!["Image_Create_DM", "-T", "VM1", "-f", entry_arg.as_str()]);
        assert_eq!(calls[2], vec!["Image_Activate", "-T", "VM1"]);
    }

    #[tokio::test]
    async fn test_missing_image_is_not_an_error() {
        let mock = Arc::new(MockSmcli::new());
        let smcli = Smcli::new(mock.clone(), "smcli", "zhcp");

        assert!(!smcli.image_exists("VM1").await.unwrap());
        smcli.image_delete_if_present("VM1").await.unwrap();

        mock.seed_directory_entry("VM1", "USER VM1 AUTOONLY 32M 32M G\n");
        assert!(smcli.image_exists("VM1").await.unwrap());
        smcli.image_delete_if_present("VM1").await.unwrap();
        assert!(mock.directory_entry("VM1").is_none());

        // Any other failure still surfaces.
        mock.push_reply("Image_Status_Query", MockReply::Exit { code: 8, detail: "RC=100 RS=12".to_string() });
        assert!(smcli.image_exists("VM1").await.is_err());
    }
}
