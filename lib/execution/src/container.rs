use data::{ElemType, Mapping, MappingList, SwitchStat};
use space::{Group, Slice, Space};
use tracing::{debug, trace};
use transition::{Transition, TransitionPlan};
use transport::{Result, Transport};

use crate::executor::Executor;

/// A partitioned container: the process-local mappings of one distributed
/// array plus its switch statistics.
pub struct Data {
    name: String,
    space: Space,
    elem: &'static dyn ElemType,
    mappings: MappingList,
    stat: SwitchStat,
}

impl Data {
    pub fn new(name: impl Into<String>, space: Space, elem: &'static dyn ElemType) -> Self {
        Data {
            name: name.into(),
            space,
            elem,
            mappings: MappingList::default(),
            stat: SwitchStat::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn space(&self) -> &Space {
        &self.space
    }

    pub fn elem(&self) -> &'static dyn ElemType {
        self.elem
    }

    pub fn elemsize(&self) -> usize {
        self.elem.size()
    }

    pub fn stat(&self) -> &SwitchStat {
        &self.stat
    }

    pub fn mappings(&self) -> &MappingList {
        &self.mappings
    }

    /// Access one mapping, allocating it on first touch.
    pub fn map(&mut self, map_no: usize) -> &mut Mapping {
        let m = self.mappings.map_mut(map_no);
        m.ensure_allocated();
        m
    }

    /// Install the initial mapping list for the active partitioning, one
    /// mapping per required slice. Used for the first partitioning, where
    /// no transition is needed.
    pub fn activate(&mut self, required: &[Slice]) {
        assert!(self.mappings.is_empty(), "container already has mappings");
        let elemsize = self.elem.size();
        self.mappings = MappingList::new(
            required
                .iter()
                .map(|slc| Mapping::new(*slc, elemsize))
                .collect(),
        );
    }

    /// Fill the container's first mapping with a value (doubles only).
    pub fn fill_f64(&mut self, v: f64) {
        assert_eq!(self.elem.size(), 8, "fill_f64 on non-double container");
        self.map(0).as_mut_slice::<f64>().fill(v);
    }

    /// Switch to a new partitioning described by `transition`, with the
    /// target mappings covering `new_required`.
    ///
    /// Order of work: the executor drives reductions and peer exchanges,
    /// then local copies and reduction-identity inits run here, then the
    /// old mappings are dropped.
    #[allow(clippy::too_many_arguments)]
    pub fn switch(
        &mut self,
        executor: &mut Executor,
        transport: &mut dyn Transport,
        group: &Group,
        transition: &Transition,
        plan: Option<&mut TransitionPlan>,
        new_required: &[Slice],
    ) -> Result<()> {
        assert_eq!(self.space.dims(), transition.dims);
        let elemsize = self.elem.size();
        let mut to = MappingList::new(
            new_required
                .iter()
                .map(|slc| Mapping::new(*slc, elemsize))
                .collect(),
        );

        if group.is_member() {
            let from = std::mem::take(&mut self.mappings);
            debug!(data = %self.name, gid = group.gid(), "switching partitioning");
            executor.exec(
                transport,
                group,
                self.elem,
                transition,
                plan,
                Some(&from),
                Some(&mut to),
                &mut self.stat,
            )?;

            for op in &transition.local {
                let src = from.map(op.from_map_no);
                if !src.is_allocated() {
                    assert!(op.slc.is_empty(), "kept slice {} was never written", op.slc);
                    continue;
                }
                let dst = to.map_mut(op.to_map_no);
                dst.ensure_allocated();
                trace!(slc = %op.slc, "local copy");
                let mut idx = op.slc.from;
                loop {
                    dst.element_mut(&idx).copy_from_slice(src.element(&idx));
                    if !op.slc.next_lex(&mut idx) {
                        break;
                    }
                }
                self.stat.add_copied(op.slc.size(), elemsize);
            }

            for op in &transition.init {
                let m = to.map_mut(op.map_no);
                m.ensure_allocated();
                trace!(slc = %op.slc, op = %op.op, "init to reduction identity");
                let mut idx = op.slc.from;
                loop {
                    self.elem.init(m.element_mut(&idx), op.op);
                    if !op.slc.next_lex(&mut idx) {
                        break;
                    }
                }
                self.stat.add_initialized(op.slc.size(), elemsize);
            }

            // the old mappings are released only now, after local copies
            drop(from);
        }

        self.mappings = to;
        self.stat.switches += 1;
        Ok(())
    }
}
