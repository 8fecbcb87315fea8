//! Device cleanup jobs
//!
//! One job per removed OSD, one container per device. Every container runs a
//! bash script built from the parts below: partition teardown, optionally
//! followed by a full disk zap, or a stale device mapper cleanup when the
//! device is gone. The OSD host directory is removed as the last step.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use super::devices::is_lvm_rook_made;
use super::TaskRun;
use crate::models::{
    CleanupContainer, CleanupJob, DaemonKey, DeviceInfo, HostPathVolume, VolumeMount,
};

/// `app` label of cleanup jobs
pub const CLEANUP_JOB_APP: &str = "pelagia-lcm-cleanup-disks";

const JOB_NAME_PREFIX: &str = "device-cleanup-job-";
const MAX_NAME_LENGTH: usize = 63;

fn cleanup_script(body: &str) -> String {
    format!("set -xe\n{}\n", body)
}

fn disk_cleanup_script(path: &str, rotational: bool, tail: &str) -> String {
    format!(
        r#"# running disk cleanup script part
DEVICE_PATH={path}
ROTATIONAL={rotational}
: ${{DEVICE_PATH?:Device var \$DEVICE_PATH is not set}}
echo "cleaning disk '${{DEVICE_NAME}}'..."
DEVICE_CHILDRENS=$(lsblk ${{DEVICE_PATH}} -o TYPE,NAME --noheadings -J | jq -r '.blockdevices[].children[]?|.name')
for children in ${{DEVICE_CHILDRENS}}; do
    dmsetup remove ${{children}}
    lvDir=/dev/$(echo ${{children//-/\/}} | sed 's_//_-_g')
    rm -rf ${{lvDir}} /dev/mapper/${{children}}
    lvremove ${{lvDir}}
    [ -d $(dirname ${{lvDir}}) ] && rmdir --ignore-fail-on-non-empty $(dirname ${{lvDir}})
done
{tail}
sgdisk --zap-all ${{DEVICE_PATH}}
if [[ "${{ROTATIONAL}}" == "true" ]]; then
    dd if=/dev/zero of="${{DEVICE_PATH}}" bs=1M count=100 oflag=direct,dsync
else
    blkdiscard "${{DEVICE_PATH}}"
fi
partprobe ${{DEVICE_PATH}}
echo "disk '${{DEVICE_NAME}}' is cleaned up!"
"#
    )
}

fn partition_cleanup_script(partition: &str, destroy: bool, tail: &str) -> String {
    format!(
        r#"# running partition cleanup script part
PARTITION={partition}
DESTROY={destroy}
: ${{PARTITION?:Partition var \$PARTITION is not set}}
if ! test -h "${{PARTITION}}"; then
    echo "Partition ${{PARTITION}} is not found, skipping cleanup"
    exit 0
fi
echo "cleaning partition '${{PARTITION}}' on disk '${{DEVICE_NAME}}'..."
PARTITION_TYPE=$(lsblk ${{PARTITION}} -o type -J -p | jq -r '.blockdevices[] | .type')
if [[ "${{PARTITION_TYPE}}" != "lvm" || "${{DESTROY}}" != "true" ]]; then
    ceph-volume lvm zap ${{PARTITION}}
    exit 0
fi

mapper=$(readlink -f ${{PARTITION}})
dmsetup remove ${{mapper}}
rm -rf ${{PARTITION}} ${{mapper}}
lvremove ${{PARTITION}}
[ -d $(dirname ${{PARTITION}}) ] && rmdir --ignore-fail-on-non-empty $(dirname ${{PARTITION}})
echo "partition '${{PARTITION}}' on disk '${{DEVICE_NAME}}' is cleaned up!"
{tail}
"#
    )
}

fn dm_table_cleanup_script(mapper: &str, tail: &str) -> String {
    format!(
        r#"# running dm table cleanup script part
DM_NAME={mapper}
: ${{DM_NAME?:Mapper name var \$DM_NAME is not set}}
echo "cleaning mapper '${{DM_NAME}}' from table if possible..."
if ! test -b "${{DM_NAME}}"; then
    exit 0
fi
MAPPER_NAME=$(dmsetup info -c -o name --noheadings ${{DM_NAME}})
OPEN_COUNT=$(dmsetup info -c -o open --noheadings ${{MAPPER_NAME}})
if [[ "${{OPEN_COUNT}}" == "0" ]]; then
    dmsetup remove ${{MAPPER_NAME}}
    lvDir=/dev/$(echo ${{MAPPER_NAME//-/\/}} | sed 's_//_-_g')
    rm -rf ${{lvDir}} /dev/mapper/${{MAPPER_NAME}}
    [ -d $(dirname ${{lvDir}}) ] && rmdir --ignore-fail-on-non-empty $(dirname ${{lvDir}})
    echo "mapper '${{DM_NAME}}' from table is cleaned up!"
fi
{tail}
"#
    )
}

fn host_directory_cleanup_script(directory: &str) -> String {
    format!(
        r#"# running host rook dir cleanup script part
HOST_DIRECTORY={directory}
if ! test -d "${{HOST_DIRECTORY}}"; then
   echo "host directory '${{HOST_DIRECTORY}}' does not exist, skipping remove"
elif test -b "${{HOST_DIRECTORY}}/block" || test -b "${{HOST_DIRECTORY}}/block.db"; then
   echo "could not clean up directory ${{HOST_DIRECTORY}}, which still is in use, skipping"
else
  rm -rf ${{HOST_DIRECTORY}}
fi
"#
    )
}

/// Cleanup script for a single device
pub fn device_script(device: &DeviceInfo, host_directory: &str, allow_manual_lvm: bool) -> String {
    let tail = if host_directory.is_empty() {
        String::new()
    } else {
        host_directory_cleanup_script(host_directory)
    };
    if !device.alive {
        return cleanup_script(&dm_table_cleanup_script(&device.partition, &tail));
    }
    let destroy = is_lvm_rook_made(&device.partition) || allow_manual_lvm;
    let body = if device.zap && destroy {
        let disk = disk_cleanup_script(&device.path, device.rotational, &tail);
        partition_cleanup_script(&device.partition, destroy, &disk)
    } else {
        partition_cleanup_script(&device.partition, destroy, &tail)
    };
    cleanup_script(&body)
}

/// Osd id as used in job names and labels, `__` is not allowed there
pub fn job_osd_id(key: &DaemonKey) -> String {
    let raw = key.to_string();
    if key.is_stray() {
        raw.replace("__", "")
    } else {
        raw
    }
}

/// Job name for an OSD on a host, hashed when too long for a k8s name
pub fn job_name(host: &str, osd_id: &str) -> String {
    let suffix = format!("{}-{}", host, osd_id);
    if suffix.len() + JOB_NAME_PREFIX.len() > MAX_NAME_LENGTH {
        let digest = Sha256::digest(suffix.as_bytes());
        return format!("{}{}", JOB_NAME_PREFIX, hex::encode(&digest[..16]));
    }
    format!("{}{}", JOB_NAME_PREFIX, suffix)
}

impl<'a> TaskRun<'a> {
    /// Render the cleanup job for an OSD.
    ///
    /// The job name is returned even when rendering fails so the caller can
    /// report it.
    pub fn render_cleanup_job(
        &self,
        host: &str,
        key: &DaemonKey,
        host_directory: &str,
        devices: &BTreeMap<String, DeviceInfo>,
    ) -> (String, Result<CleanupJob>) {
        let image = match self.cluster.image.as_deref() {
            Some(image) if !image.is_empty() => image.to_string(),
            _ => {
                return (
                    String::new(),
                    Err(anyhow!(
                        "failed to determine ceph cluster image, no current used image in status"
                    )),
                )
            }
        };

        let data_dir = self.cluster.data_dir();
        let mut volumes = vec![
            HostPathVolume {
                name: "host-dev".into(),
                path: "/dev".into(),
                directory: false,
            },
            // ceph-volume zap relies on udev data
            HostPathVolume {
                name: "run-udev".into(),
                path: "/run/udev".into(),
                directory: true,
            },
        ];
        let mut mounts = vec![
            VolumeMount {
                name: "host-dev".into(),
                mount_path: "/dev".into(),
                read_only: false,
            },
            VolumeMount {
                name: "run-udev".into(),
                mount_path: "/run/udev".into(),
                read_only: true,
            },
        ];
        if !host_directory.is_empty() && host_directory.starts_with(data_dir) {
            volumes.push(HostPathVolume {
                name: "host-rook".into(),
                path: data_dir.to_string(),
                directory: false,
            });
            mounts.push(VolumeMount {
                name: "host-rook".into(),
                mount_path: data_dir.to_string(),
                read_only: false,
            });
        } else {
            warn!(
                "incorrect rook/osd data host path for osd '{}', host '{}' (rook path: '{}', osd path: '{}'), host dir cleanup will be skipped",
                key, host, data_dir, host_directory
            );
        }

        let osd_id = job_osd_id(key);
        let name = job_name(host, &osd_id);
        let mut labels = BTreeMap::from([
            ("app".to_string(), CLEANUP_JOB_APP.to_string()),
            ("rook-cluster".to_string(), self.cluster.name.clone()),
            ("host".to_string(), host.to_string()),
            ("osd".to_string(), osd_id),
            ("task".to_string(), self.task.name.clone()),
        ]);

        let mut broken = false;
        for (device, info) in devices {
            if info.partition.is_empty() || info.path.is_empty() {
                error!(
                    "device info has no required information for job run: partition or device path missed for osd '{}', host '{}'",
                    key, host
                );
                broken = true;
                continue;
            }
            labels.insert(device.replace("/dev/", ""), "true".to_string());
        }
        if broken {
            return (
                name,
                Err(anyhow!("partition or device path missed in provided info")),
            );
        }

        let containers = devices
            .iter()
            .enumerate()
            .map(|(idx, (device, info))| CleanupContainer {
                name: format!("cleanup-run-{}", idx + 1),
                device: device.clone(),
                script: device_script(info, host_directory, self.settings.allow_manual_lvm),
            })
            .collect();

        let job = CleanupJob {
            name: name.clone(),
            namespace: self.settings.namespace.clone(),
            labels,
            host: host.to_string(),
            image,
            active_deadline_secs: self.settings.job_deadline_secs,
            volumes,
            mounts,
            containers,
        };
        (name, Ok(job))
    }

    /// Render and submit the cleanup job for an OSD
    pub async fn run_cleanup_job(
        &self,
        host: &str,
        key: &DaemonKey,
        host_directory: &str,
        devices: &BTreeMap<String, DeviceInfo>,
    ) -> (String, Result<()>) {
        let (name, job) = self.render_cleanup_job(host, key, host_directory, devices);
        let job = match job {
            Ok(job) => job,
            Err(e) => return (name, Err(e)),
        };
        info!(
            "creating cleanup job '{}/{}' for osd '{}', host '{}'",
            job.namespace, job.name, key, host
        );
        let result = self.create_cleanup_job(&job).await;
        if let Err(e) = &result {
            error!("failed to create cleanup job '{}': {:#}", name, e);
        }
        (name, result)
    }

    /// Create a job, replacing a finished one with the same name
    async fn create_cleanup_job(&self, job: &CleanupJob) -> Result<()> {
        self.settings
            .retry
            .run(|| async move {
                let api = &self.backends.cluster;
                if let Some(present) = api.get_job(&job.namespace, &job.name).await? {
                    if present.active > 0 {
                        warn!(
                            "found old cleanup '{}' job, which is not finished yet, waiting its completion",
                            job.name
                        );
                        anyhow::bail!("waiting old job");
                    }
                    warn!(
                        "found old cleanup '{}' job, trying to remove before new job creation",
                        job.name
                    );
                    api.delete_job(&job.namespace, &job.name).await?;
                }
                api.create_job(job).await
            })
            .await
    }
}
