//! Process-level statistics for the introspection endpoint. Peripheral to
//! the execution pipeline; read-only.
use serde_json::{json, Value};
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Snapshot the current process: memory, cpu, thread and fd counts. The
/// fd/thread counts read procfs and come out as zero where that is not
/// available.
pub fn process_snapshot(uptime_seconds: u64) -> Value {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.refresh_processes(ProcessesToUpdate::All, true);

    let pid = Pid::from_u32(std::process::id());
    let (proc_memory_mb, proc_cpu) = match sys.process(pid) {
        Some(proc) => (proc.memory() / 1024 / 1024, proc.cpu_usage()),
        None => (0, 0.0),
    };

    let open_fds = std::fs::read_dir("/proc/self/fd")
        .map(|d| d.count())
        .unwrap_or(0);
    let thread_count = std::fs::read_dir("/proc/self/task")
        .map(|d| d.count())
        .unwrap_or(0);

    json!({
        "uptime_seconds": uptime_seconds,
        "cpu_num": std::thread::available_parallelism().map(|n| n.get()).unwrap_or(0),
        "process_memory_mb": proc_memory_mb,
        "process_cpu_percent": proc_cpu,
        "thread_count": thread_count,
        "open_fds": open_fds,
        "available_memory_mb": sys.available_memory() / 1024 / 1024,
    })
}
