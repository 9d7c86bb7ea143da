//! Platform-specific helpers: well-known paths and process liveness.

pub mod paths;

/// Returns whether a process with the given PID is currently running.
///
/// Used to decide whether a lock sentinel left behind by another process is stale.
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
  use rustix::process::{Pid, test_kill_process};

  let Ok(raw) = i32::try_from(pid) else {
    return false;
  };
  let Some(pid) = Pid::from_raw(raw) else {
    return false;
  };

  match test_kill_process(pid) {
    Ok(()) => true,
    // EPERM means the process exists but belongs to someone else.
    Err(err) => err == rustix::io::Errno::PERM,
  }
}

#[cfg(windows)]
pub fn process_alive(pid: u32) -> bool {
  use windows_sys::Win32::Foundation::{CloseHandle, STILL_ACTIVE};
  use windows_sys::Win32::System::Threading::{GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION};

  // SAFETY: OpenProcess returns a null handle on failure, which we check before use.
  // GetExitCodeProcess writes into a local u32 and the handle is closed exactly once.
  unsafe {
    let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
    if handle.is_null() {
      return false;
    }
    let mut code: u32 = 0;
    let ok = GetExitCodeProcess(handle, &mut code);
    CloseHandle(handle);
    ok != 0 && code == STILL_ACTIVE as u32
  }
}
