//! Session teardown
//!
//! Processes are never torn down from whichever host thread asks for it.
//! A dedicated kernel thread takes the process set lock, terminates
//! applications and then service hosts (each newest first), and clears
//! the set. Nothing on a thread's exit path takes the process set lock.

use std::cmp::Reverse;
use std::sync::Arc;
use std::time::Duration;

use hos_kernel_core::{ThreadState, ThreadType};
use log::{error, info};

use crate::context::KernelContext;
use crate::error::KernelError;
use crate::process::{Process, ThreadEntry};
use crate::syscall::ExecutionContext;

const TERMINATION_PROCESS_NAME: &str = "KernelTermination";

impl KernelContext {
    /// Terminate every process, running `hook` after the applications are
    /// gone and before the service hosts are.
    ///
    /// # Errors
    /// * `TerminationThreadStalled` - the termination thread did not start
    ///   within `termination_start_timeout_ms`; the session cannot continue
    pub fn terminate_all(&self, hook: impl FnOnce() + Send + 'static) -> Result<(), KernelError> {
        self.resume();
        self.begin_shutdown();

        let host = self.create_kernel_process(TERMINATION_PROCESS_NAME)?;
        let entry: ThreadEntry = Box::new(move |context: &ExecutionContext| {
            context.kernel().terminate_processes(hook);
            Ok(())
        });
        let thread = host.create_thread(self.next_thread_id(), 0, ThreadType::Kernel, entry)?;
        thread.start(self.arc()?)?;

        let window = Duration::from_millis(self.config().termination_start_timeout_ms);
        if !thread.wait_for_state(Some(window), |state| state >= ThreadState::Running) {
            error!("Termination thread did not start within {:?}", window);
            return Err(KernelError::TerminationThreadStalled);
        }
        thread.join();
        host.terminate();
        info!("All processes terminated");
        Ok(())
    }

    fn terminate_processes(&self, hook: impl FnOnce()) {
        let mut processes = self.lock_processes();
        let mut ordered: Vec<Arc<Process>> = processes.values().cloned().collect();
        ordered.sort_by_key(|process| Reverse(process.creation_order()));

        for process in ordered.iter().filter(|p| p.is_application()) {
            process.terminate();
        }
        hook();
        for process in ordered.iter().filter(|p| !p.is_application()) {
            process.terminate();
        }
        processes.clear();
    }
}
