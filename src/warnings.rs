use crate::config;

pub(crate) enum RuntimeWarning<'a> {
    DroppedHandle(&'a str),
    CollectiveTimeout(&'a str, f64),
}

impl<'a> RuntimeWarning<'a> {
    #[allow(dead_code)]
    fn print_warning(&self) -> bool {
        match self {
            RuntimeWarning::DroppedHandle(_) => match config().dropped_handle_warning {
                Some(true) => true,
                Some(false) => false,
                None => true,
            },
            RuntimeWarning::CollectiveTimeout(_, elapsed) => {
                config().deadlock_timeout > 0.0 && *elapsed > config().deadlock_timeout
            }
        }
    }

    #[cfg(feature = "runtime-warnings-panic")]
    fn panic(&self, msg: &str) {
        match self {
            RuntimeWarning::CollectiveTimeout(_, _) => {}
            _ => panic!("{msg}
                Note this warning causes a panic because you have compiled pgas-comm with the `runtime-warnings-panic` feature.
                Recompile without this feature to only print warnings, rather than panic.
                To disable runtime warnings completely, recompile pgas-comm with the `disable-runtime-warnings` feature.
                To view backtrace set RUST_LIB_BACKTRACE=1.
                {}",
                std::backtrace::Backtrace::capture()),
        }
    }

    pub(crate) fn print(self) {
        #[cfg(not(feature = "disable-runtime-warnings"))]
        if self.print_warning() {
            let msg = match self {
                RuntimeWarning::DroppedHandle(msg) => {
                    format!("[PGAS WARNING] You are dropping {msg} whose requests are still in flight.
                    The requests have been released, any data they were fetching is lost and the transfer may or may not have reached its target.
                    Complete handles with wait, wait_local or test_local before dropping them. Set PGAS_DROPPED_HANDLE_WARNING=false to disable this warning.")
                }
                RuntimeWarning::CollectiveTimeout(name, _) => {
                    format!("[PGAS WARNING][{:?}] You have encountered a {name} timeout. Potential deadlock detected.
                    Collective operations require every unit of the team to enter the same call.
                    The deadlock timeout can be set via the PGAS_DEADLOCK_TIMEOUT environment variable, the current timeout is {} seconds, setting this to 0 will disable this warning.",
                        std::thread::current().id(), config().deadlock_timeout)
                }
            };

            #[cfg(feature = "runtime-warnings-panic")]
            self.panic(&msg);
            tracing::warn!("{msg}");
            println!(
                "{msg}
                Note that this warning is informative only, and will not terminate your application.
                To disable runtime warnings completely, recompile pgas-comm with the `disable-runtime-warnings` feature.
                To view backtrace set RUST_LIB_BACKTRACE=1.
                {}",
                std::backtrace::Backtrace::capture()
            );
        }
    }
}
