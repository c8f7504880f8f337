//! Process liveness probes for the claim manager.

/// Answers whether a pid is a live process on this host. The claim manager
/// uses this to decide if a recorded executor still blocks a claim.
pub trait ProcessProbe: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Probe backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

#[cfg(unix)]
impl ProcessProbe for SystemProbe {
    /// Signal 0 checks for existence without delivering anything. EPERM
    /// means the process exists but belongs to another user, which still
    /// counts as alive.
    fn is_alive(&self, pid: u32) -> bool {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        if pid == 0 || pid > i32::MAX as u32 {
            return false;
        }
        match kill(Pid::from_raw(pid as i32), None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }
}

#[cfg(not(unix))]
impl ProcessProbe for SystemProbe {
    /// Without a signal interface every recorded pid reads as dead. Claims
    /// then favor self-healing, and the conditional update still keeps them
    /// exclusive.
    fn is_alive(&self, _pid: u32) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_zero_is_never_alive() {
        assert!(!SystemProbe.is_alive(0));
    }

    #[cfg(unix)]
    #[test]
    fn own_process_is_alive() {
        assert!(SystemProbe.is_alive(std::process::id()));
    }

    #[cfg(unix)]
    #[test]
    fn out_of_range_pid_is_dead() {
        assert!(!SystemProbe.is_alive(u32::MAX));
    }
}
