//! In-process delivery of probe events to the correlator.
//!
//! Events are handed to `enter` and `exit` by whatever observes the traced
//! functions. Both take `&self` and may be called from any number of threads
//! at once.

use super::*;
use crate::common::{Clock, DisplayUnit};
use crate::correlator::{Correlator, EventContext, Filter};
use crate::histogram::AtomicTable;

use std::collections::HashMap;

pub struct LocalProbes {
    correlator: Correlator,
    table: Arc<AtomicTable>,
    entries: HashMap<&'static str, EntryHandler>,
    returns: HashMap<&'static str, ReturnHandler>,
}

impl LocalProbes {
    pub fn new(filter: Filter, unit: DisplayUnit, clock: Arc<dyn Clock>) -> Self {
        let table = Arc::new(AtomicTable::new());
        let correlator = Correlator::new(filter, unit, table.clone(), clock);

        Self {
            correlator,
            table,
            entries: HashMap::new(),
            returns: HashMap::new(),
        }
    }

    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    /// Delivers entry into `target`. Returns false if no handler is attached.
    pub fn enter(&self, target: &str, ctx: &EventContext) -> bool {
        match self.entries.get(target) {
            Some(EntryHandler::Plain) => self.correlator.on_entry(ctx),
            Some(EntryHandler::FileOpsFiltered) => self.correlator.on_read_entry(ctx),
            None => return false,
        }

        true
    }

    /// Delivers return from `target`. Returns false if no handler is attached.
    pub fn exit(&self, target: &str, ctx: &EventContext) -> bool {
        match self.returns.get(target) {
            Some(ReturnHandler::Return(op)) => self.correlator.on_return(ctx, *op),
            None => return false,
        }

        true
    }
}

impl Attach for LocalProbes {
    fn attach_entry(
        &mut self,
        target: &'static str,
        handler: EntryHandler,
    ) -> Result<(), ProbeError> {
        if self.entries.contains_key(target) {
            return Err(ProbeError::Attach {
                kind: "entry",
                target,
                reason: "already attached".into(),
            });
        }

        self.entries.insert(target, handler);
        Ok(())
    }

    fn attach_return(
        &mut self,
        target: &'static str,
        handler: ReturnHandler,
    ) -> Result<(), ProbeError> {
        if self.returns.contains_key(target) {
            return Err(ProbeError::Attach {
                kind: "return",
                target,
                reason: "already attached".into(),
            });
        }

        self.returns.insert(target, handler);
        Ok(())
    }
}

impl Probes for LocalProbes {
    fn table(&self) -> Arc<dyn HistogramTable> {
        self.table.clone()
    }

    fn drops(&self) -> DropCounts {
        self.correlator.drops()
    }
}
