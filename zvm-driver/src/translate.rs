//! Translation of domain descriptions into z/VM user directory entries.
//!
//! The output is what `Image_Create_DM` consumes:
//!
//! ```text
//! USER LINUX01 AUTOONLY 2G 4G G
//!  INCLUDE LNXDFLT
//!  MACHINE ESA 2
//!  CPU 00 BASE
//!  CPU 01
//!  IPL 0100
//! ```
//!
//! Rendering is deterministic: the same description always yields the same
//! bytes. Every description field is either encoded, defaulted, or rejected.

use crate::error::{DriverError, Result};
use crate::types::{DomainDescription, VirtType};

/// Password that only lets SMAPI log the guest on.
pub const AUTOONLY_PASSWORD: &str = "AUTOONLY";

/// Upper bound of z/VM virtual CPU addresses (00-3F).
pub const ZVM_CPU_ADDRESS_LIMIT: u32 = 64;

/// Builder for z/VM directory entries.
pub struct DirectoryEntryBuilder<'a> {
    desc: &'a DomainDescription,
    max_vcpus: u32,
}

impl<'a> DirectoryEntryBuilder<'a> {
    /// Create a builder for `desc`, accepting at most `max_vcpus` CPUs.
    pub fn new(desc: &'a DomainDescription, max_vcpus: u32) -> Self {
        Self {
            desc,
            max_vcpus: max_vcpus.min(ZVM_CPU_ADDRESS_LIMIT),
        }
    }

    /// Validate the description and render the directory entry.
    pub fn build(&self) -> Result<String> {
        let desc = self.desc;

        if desc.virt_type != VirtType::Zvm {
            return Err(DriverError::WrongDriverType {
                expected: VirtType::Zvm.to_string(),
                found: desc.virt_type.to_string(),
            });
        }

        let userid = desc.userid();
        check_cp_name("user ID", &userid)?;

        let password = match &desc.password {
            Some(p) => {
                let p = p.to_ascii_uppercase();
                check_cp_name("password", &p)?;
                p
            }
            None => AUTOONLY_PASSWORD.to_string(),
        };

        let memory = desc.memory_mib;
        let max_memory = desc.effective_max_memory_mib();
        if memory == 0 {
            return Err(DriverError::ConfigurationInvalid("memory must be greater than 0".to_string()));
        }
        if memory > max_memory {
            return Err(DriverError::ConfigurationInvalid(format!(
                "memory {}M exceeds maximum memory {}M",
                memory, max_memory
            )));
        }

        let classes = desc.privilege_classes.to_ascii_uppercase();
        check_privilege_classes(&classes)?;

        if desc.vcpus == 0 || desc.vcpus > self.max_vcpus {
            return Err(DriverError::ConfigurationInvalid(format!(
                "vcpus must be between 1 and {}, got {}",
                self.max_vcpus, desc.vcpus
            )));
        }

        let mut entry = format!(
            "USER {} {} {} {} {}\n",
            userid,
            password,
            format_storage(memory),
            format_storage(max_memory),
            classes
        );

        if let Some(profile) = &desc.profile {
            let profile = profile.to_ascii_uppercase();
            check_cp_name("profile", &profile)?;
            entry.push_str(&format!(" INCLUDE {}\n", profile));
        }

        entry.push_str(&format!(" MACHINE ESA {}\n", desc.vcpus));
        entry.push_str(" CPU 00 BASE\n");
        for cpu in 1..desc.vcpus {
            entry.push_str(&format!(" CPU {:02X}\n", cpu));
        }

        if let Some(ipl) = &desc.ipl {
            let ipl = ipl.to_ascii_uppercase();
            check_cp_name("IPL target", &ipl)?;
            entry.push_str(&format!(" IPL {}\n", ipl));
        }

        Ok(entry)
    }
}

/// Render a description as a directory entry.
pub fn translate(desc: &DomainDescription, max_vcpus: u32) -> Result<String> {
    DirectoryEntryBuilder::new(desc, max_vcpus).build()
}

/// Storage size in CP notation: `2G` for whole GiB, `1536M` otherwise.
pub fn format_storage(mib: u64) -> String {
    if mib % 1024 == 0 {
        format!("{}G", mib / 1024)
    } else {
        format!("{}M", mib)
    }
}

/// User IDs, passwords, profile and IPL names: 1-8 of `A-Z 0-9 @ # $`.
fn check_cp_name(what: &str, value: &str) -> Result<()> {
    let valid = (1..=8).contains(&value.len())
        && value.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b"@#$".contains(&b));
    if valid {
        Ok(())
    } else {
        Err(DriverError::ConfigurationInvalid(format!(
            "{} '{}' must be 1 to 8 characters of A-Z, 0-9, @, # or $",
            what, value
        )))
    }
}

fn check_privilege_classes(classes: &str) -> Result<()> {
    let valid = (1..=8).contains(&classes.len())
        && classes.bytes().all(|b| b.is_ascii_uppercase() || (b'1'..=b'6').contains(&b));
    if valid {
        Ok(())
    } else {
        Err(DriverError::ConfigurationInvalid(format!(
            "privilege classes '{}' must be 1 to 8 characters of A-Z or 1-6",
            classes
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_entry() {
        let desc = DomainDescription::new("vm1").with_memory(32);
        let entry = translate(&desc, 64).unwrap();
        assert_eq!(entry, "USER VM1 AUTOONLY 32M 32M G\n MACHINE ESA 1\n CPU 00 BASE\n");
    }

    #[test]
    fn test_full_entry() {
        let desc = DomainDescription::new("linux01")
            .with_memory(2048)
            .with_max_memory(4096)
            .with_vcpus(3)
            .with_privilege_classes("bg")
            .with_password("secret1")
            .with_profile("lnxdflt")
            .with_ipl("0100");
        let entry = translate(&desc, 64).unwrap();
        assert_eq!(
            entry,
            "USER LINUX01 SECRET1 2G 4G BG\n INCLUDE LNXDFLT\n MACHINE ESA 3\n CPU 00 BASE\n CPU 01\n CPU 02\n IPL 0100\n"
        );
    }

    #[test]
    fn test_deterministic() {
        let desc = DomainDescription::new("vm1").with_memory(1536).with_vcpus(12);
        let first = translate(&desc, 64).unwrap();
        let second = translate(&desc, 64).unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());
        assert!(first.contains(" CPU 0B\n"));
        assert!(first.contains("1536M 1536M"));
    }

    #[test]
    fn test_wrong_virt_type() {
        let desc = DomainDescription::new("vm1").with_virt_type(VirtType::Kvm);
        match translate(&desc, 64).unwrap_err() {
            DriverError::WrongDriverType { expected, found } => {
                assert_eq!(expected, "zvm");
                assert_eq!(found, "kvm");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_descriptions() {
        let cases = vec![
            DomainDescription::new(""),
            DomainDescription::new("toolongname"),
            DomainDescription::new("vm-1"),
            DomainDescription::new("vm1").with_memory(0),
            DomainDescription::new("vm1").with_memory(1024).with_max_memory(512),
            DomainDescription::new("vm1").with_vcpus(0),
            DomainDescription::new("vm1").with_vcpus(65),
            DomainDescription::new("vm1").with_privilege_classes("G7"),
            DomainDescription::new("vm1").with_privilege_classes(""),
            DomainDescription::new("vm1").with_password("has space"),
            DomainDescription::new("vm1").with_profile("bad.prof"),
        ];
        for desc in cases {
            assert!(
                matches!(translate(&desc, 64), Err(DriverError::ConfigurationInvalid(_))),
                "accepted {:?}",
                desc
            );
        }
    }

    #[test]
    fn test_vcpu_limit_follows_configuration() {
        let desc = DomainDescription::new("vm1").with_vcpus(8);
        assert!(translate(&desc, 8).is_ok());
        assert!(translate(&desc, 4).is_err());
        // The CPU address space caps the configured limit.
        let desc = DomainDescription::new("vm1").with_vcpus(65);
        assert!(translate(&desc, 128).is_err());
    }

    #[test]
    fn test_format_storage() {
        assert_eq!(format_storage(32), "32M");
        assert_eq!(format_storage(1024), "1G");
        assert_eq!(format_storage(3072), "3G");
        assert_eq!(format_storage(1025), "1025M");
    }
}
