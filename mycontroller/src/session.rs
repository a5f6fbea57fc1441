/*
Copyright (c) 2022 VMware, Inc.
SPDX-License-Identifier: MIT
Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:
The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.
THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
*/

//! Runs one controller session: connect to every switch, claim mastership, push the pipeline,
//! install the rules, and close every connection however the run ends.

use crate::rules::RuleSet;
use crate::topology::SwitchSpec;
use p4ext::{P4Error, P4InfoHelper, PipelineConfig, SwitchConnection};
use signal_hook::consts::signal::SIGINT;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum Error {
    #[error("interrupted")]
    Interrupted,

    #[error(transparent)]
    Switch(#[from] P4Error),
}

/// Exit status after a second SIGINT.
pub const FORCED_EXIT_STATUS: i32 = 1;

/// A flag raised by SIGINT, polled between steps of a session.
#[derive(Clone, Debug, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Default::default()
    }

    /// Makes SIGINT raise this flag instead of terminating the process.  A second SIGINT,
    /// arriving while the flag is already raised, exits with [`FORCED_EXIT_STATUS`]: a call
    /// blocked on an unresponsive switch never gets back to poll the flag.
    pub fn register_sigint(&self) -> io::Result<()> {
        // The conditional shutdown must run before the flag is set, so it only fires on a
        // repeated SIGINT.
        signal_hook::flag::register_conditional_shutdown(SIGINT, FORCED_EXIT_STATUS, self.0.clone())?;
        signal_hook::flag::register(SIGINT, self.0.clone())?;
        Ok(())
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), Error> {
        if self.is_raised() {
            Err(Error::Interrupted)
        } else {
            Ok(())
        }
    }
}

/// Owns the open switch connections.  Each one is shut down exactly once, when this is dropped.
pub struct Sessions<C: SwitchConnection> {
    switches: Vec<C>,
}

impl<C: SwitchConnection> Sessions<C> {
    pub fn new() -> Self {
        Sessions {
            switches: Vec::new(),
        }
    }

    pub fn push(&mut self, switch: C) {
        self.switches.push(switch);
    }

    pub fn len(&self) -> usize {
        self.switches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.switches.is_empty()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, C> {
        self.switches.iter_mut()
    }
}

impl<C: SwitchConnection> Default for Sessions<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: SwitchConnection> Drop for Sessions<C> {
    fn drop(&mut self) {
        for mut switch in self.switches.drain(..) {
            debug!("{}: shutting down", switch.name());
            switch.shutdown();
        }
    }
}

/// Everything one run of a controller needs, apart from how to reach the switches.
pub struct Controller<'a> {
    pub rules: RuleSet,
    pub topology: &'a [SwitchSpec],
    pub helper: &'a P4InfoHelper,
    pub pipeline: &'a PipelineConfig,
    pub show_tables: bool,
}

impl Controller<'_> {
    /// Opens a connection to every switch with `connect`, then arbitrates on all of them,
    /// pushes the pipeline to all of them, and writes each switch's rules in order.  The first
    /// failure or a raised `interrupt` ends the run; either way every opened connection is
    /// closed before this returns.
    pub fn run<C, F>(&self, interrupt: &Interrupt, mut connect: F) -> Result<(), Error>
    where
        C: SwitchConnection,
        F: FnMut(&SwitchSpec) -> Result<C, P4Error>,
    {
        let mut sessions = Sessions::new();
        for spec in self.topology {
            interrupt.check()?;
            sessions.push(connect(spec)?);
        }

        for switch in sessions.iter_mut() {
            interrupt.check()?;
            switch.master_arbitration_update()?;
        }

        for switch in sessions.iter_mut() {
            interrupt.check()?;
            switch.set_forwarding_pipeline_config(self.pipeline)?;
        }

        for switch in sessions.iter_mut() {
            let requests = self.rules.entries(switch.name());
            for request in &requests {
                interrupt.check()?;
                let entry = self.helper.build_table_entry(request)?;
                switch.write_table_entry(&entry)?;
                debug!("{}: {request}", switch.name());
                if let Some(confirmation) = self.rules.confirmation(switch.name()) {
                    println!("{confirmation}");
                }
            }
            info!("{}: installed {} rules", switch.name(), requests.len());
        }

        if self.show_tables {
            for switch in sessions.iter_mut() {
                interrupt.check()?;
                self.print_tables(switch)?;
            }
        }
        interrupt.check()
    }

    fn print_tables<C: SwitchConnection>(&self, switch: &mut C) -> Result<(), P4Error> {
        println!("\n----- Reading tables rules for {} -----", switch.name());
        for table in self.helper.tables() {
            for entry in switch.read_table_entries(table.preamble.id)? {
                println!("{}", self.helper.format_table_entry(&entry));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proto::p4runtime::TableEntry;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tracing_test::traced_test;

    struct Closer {
        name: &'static str,
        closed: Rc<RefCell<Vec<String>>>,
    }

    impl SwitchConnection for Closer {
        fn name(&self) -> &str {
            self.name
        }

        fn device_id(&self) -> u64 {
            0
        }

        fn master_arbitration_update(&mut self) -> Result<(), P4Error> {
            Ok(())
        }

        fn set_forwarding_pipeline_config(&mut self, _: &PipelineConfig) -> Result<(), P4Error> {
            Ok(())
        }

        fn write_table_entry(&mut self, _: &TableEntry) -> Result<(), P4Error> {
            Ok(())
        }

        fn read_table_entries(&mut self, _: u32) -> Result<Vec<TableEntry>, P4Error> {
            Ok(Vec::new())
        }

        fn shutdown(&mut self) {
            self.closed.borrow_mut().push(self.name.to_string());
        }
    }

    #[test]
    #[traced_test]
    fn dropping_sessions_shuts_each_down_once() {
        let closed = Rc::new(RefCell::new(Vec::new()));
        {
            let mut sessions = Sessions::new();
            assert!(sessions.is_empty());
            for name in ["s1", "s2"] {
                sessions.push(Closer {
                    name,
                    closed: closed.clone(),
                });
            }
            assert_eq!(sessions.len(), 2);
        }
        assert_eq!(*closed.borrow(), ["s1", "s2"]);
        assert!(logs_contain("s2: shutting down"));
    }

    #[test]
    fn interrupt_is_shared_between_clones() {
        let interrupt = Interrupt::new();
        let handle = interrupt.clone();
        assert!(interrupt.check().is_ok());
        handle.raise();
        assert!(interrupt.is_raised());
        assert!(matches!(interrupt.check(), Err(Error::Interrupted)));
    }
}
