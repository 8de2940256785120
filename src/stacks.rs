use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::symbols::clean_method_symbol;

pub(crate) const UNRESOLVED_NAME: &str = "??";

/// A managed method registered from the rundown symbol records.
#[derive(Debug)]
pub struct MethodDescription {
    pub name: Arc<str>,
    pub namespace: Arc<str>,
    pub signature: Arc<str>,
    pub module_id: u64,
    pub start_address: u64,
    pub size: u32,
    cleaned: OnceCell<String>,
}

impl MethodDescription {
    pub fn new(
        name: Arc<str>,
        namespace: Arc<str>,
        signature: Arc<str>,
        module_id: u64,
        start_address: u64,
        size: u32,
    ) -> Self {
        MethodDescription {
            name,
            namespace,
            signature,
            module_id,
            start_address,
            size,
            cleaned: OnceCell::new(),
        }
    }

    fn unresolved() -> Self {
        MethodDescription::new(
            Arc::from(UNRESOLVED_NAME),
            Arc::from(""),
            Arc::from(""),
            0,
            0,
            0,
        )
    }

    /// Last address still considered inside the method.
    pub fn end_address(&self) -> u64 {
        self.start_address + u64::from(self.size)
    }

    pub fn is_unresolved(&self) -> bool {
        self.name.as_ref() == UNRESOLVED_NAME && self.start_address == 0 && self.size == 0
    }

    /// Source-like rendering of the verbose runtime symbol; computed on
    /// first use and cached.
    pub fn display_name(&self) -> &str {
        self.cleaned.get_or_init(|| {
            if self.is_unresolved() {
                UNRESOLVED_NAME.to_string()
            } else {
                clean_method_symbol(&self.namespace, &self.name, &self.signature)
            }
        })
    }
}

impl PartialEq for MethodDescription {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.namespace == other.namespace
            && self.signature == other.signature
            && self.module_id == other.module_id
            && self.start_address == other.start_address
            && self.size == other.size
    }
}

/// A resolved stack. Shared between every stack id whose recorded address
/// vector was identical.
#[derive(Debug, PartialEq)]
pub struct StackTrace {
    pub stack_index: u32,
    pub frames: Vec<Arc<MethodDescription>>,
}

impl StackTrace {
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Accumulates per-stack address vectors and method records during the
/// parse; resolution runs once, after the stream is fully consumed.
#[derive(Default)]
pub(crate) struct StackResolver {
    /// Address vector -> group index. Structural deduplication: the map key
    /// owns the addresses, so identical vectors are stored once.
    groups: HashMap<Vec<u64>, usize>,
    /// Stack ids per group, in first-seen order.
    members: Vec<Vec<u32>>,
    methods: Vec<Arc<MethodDescription>>,
}

impl StackResolver {
    pub(crate) fn add_stack(&mut self, stack_id: u32, addresses: Vec<u64>) {
        let next_index = self.members.len();
        let group = *self.groups.entry(addresses).or_insert(next_index);
        if group == next_index {
            self.members.push(Vec::new());
        }
        self.members[group].push(stack_id);
    }

    pub(crate) fn add_method(&mut self, method: MethodDescription) {
        self.methods.push(Arc::new(method));
    }

    pub(crate) fn resolve(mut self) -> ResolvedStacks {
        // Floor lookups need the methods sorted by start address; unsigned
        // comparison over the full 64-bit range.
        self.methods.sort_by_key(|m| m.start_address);
        let unresolved = Arc::new(MethodDescription::unresolved());
        let empty = Arc::new(StackTrace {
            stack_index: 0,
            frames: Vec::new(),
        });

        let mut by_id = HashMap::new();
        let mut all = Vec::with_capacity(self.groups.len());
        for (addresses, group) in &self.groups {
            let ids = &self.members[*group];
            let trace = if addresses.is_empty() {
                empty.clone()
            } else {
                let frames = addresses
                    .iter()
                    .map(|&addr| resolve_address(&self.methods, &unresolved, addr))
                    .collect();
                Arc::new(StackTrace {
                    stack_index: ids[0],
                    frames,
                })
            };
            all.push(trace.clone());
            for &id in ids {
                by_id.insert(id, trace.clone());
            }
        }
        all.sort_by_key(|t| t.stack_index);

        ResolvedStacks { by_id, all, empty }
    }
}

fn resolve_address(
    methods: &[Arc<MethodDescription>],
    unresolved: &Arc<MethodDescription>,
    address: u64,
) -> Arc<MethodDescription> {
    let after = methods.partition_point(|m| m.start_address <= address);
    if after == 0 {
        return unresolved.clone();
    }
    let floor = &methods[after - 1];
    if address <= floor.end_address() {
        floor.clone()
    } else {
        unresolved.clone()
    }
}

pub(crate) struct ResolvedStacks {
    by_id: HashMap<u32, Arc<StackTrace>>,
    /// One trace per dedup group, ordered by stack index.
    pub(crate) all: Vec<Arc<StackTrace>>,
    pub(crate) empty: Arc<StackTrace>,
}

impl ResolvedStacks {
    /// Stack ids without a recorded address vector map to the empty stack.
    pub(crate) fn get(&self, stack_id: u32) -> Arc<StackTrace> {
        self.by_id
            .get(&stack_id)
            .cloned()
            .unwrap_or_else(|| self.empty.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn method(name: &str, start_address: u64, size: u32) -> MethodDescription {
        MethodDescription::new(
            Arc::from(name),
            Arc::from("Tests"),
            Arc::from("instance void ()"),
            1,
            start_address,
            size,
        )
    }

    #[test]
    fn address_range_resolution() {
        let mut resolver = StackResolver::default();
        resolver.add_method(method("M", 0x1000, 0x40));
        resolver.add_stack(1, vec![0x0fff, 0x1020, 0x1041, 0x1000, 0x1040]);
        let resolved = resolver.resolve();

        let stack = resolved.get(1);
        assert!(stack.frames[0].is_unresolved()); // below the lowest method
        assert_eq!(stack.frames[1].name.as_ref(), "M");
        assert!(stack.frames[2].is_unresolved()); // one past the end
        assert_eq!(stack.frames[3].name.as_ref(), "M"); // exact start
        assert_eq!(stack.frames[4].name.as_ref(), "M"); // inclusive end
    }

    #[test]
    fn floor_search_picks_the_nearest_preceding_method() {
        let mut resolver = StackResolver::default();
        resolver.add_method(method("Low", 0x1000, 0x100));
        resolver.add_method(method("High", 0x2000, 0x100));
        resolver.add_stack(7, vec![0x2050, 0x1050, 0x1901]);
        let resolved = resolver.resolve();

        let stack = resolved.get(7);
        assert_eq!(stack.frames[0].name.as_ref(), "High");
        assert_eq!(stack.frames[1].name.as_ref(), "Low");
        // Past Low's end but before High: unresolved, not Low.
        assert!(stack.frames[2].is_unresolved());
    }

    #[test]
    fn identical_address_vectors_share_one_stack_trace() {
        let mut resolver = StackResolver::default();
        resolver.add_method(method("M", 0x1000, 0x40));
        resolver.add_stack(1, vec![0x1010, 0x1020]);
        resolver.add_stack(2, vec![0x1010, 0x1020]);
        resolver.add_stack(3, vec![0x1010]);
        let resolved = resolver.resolve();

        assert!(Arc::ptr_eq(&resolved.get(1), &resolved.get(2)));
        assert!(!Arc::ptr_eq(&resolved.get(1), &resolved.get(3)));
        assert_eq!(resolved.all.len(), 2);
        assert_eq!(resolved.all[0].stack_index, 1);
    }

    #[test]
    fn empty_and_unknown_stacks_map_to_the_empty_sentinel() {
        let mut resolver = StackResolver::default();
        resolver.add_stack(1, Vec::new());
        let resolved = resolver.resolve();

        assert!(resolved.get(1).is_empty());
        assert!(Arc::ptr_eq(&resolved.get(1), &resolved.get(99)));
    }

    #[test]
    fn display_name_is_cached_and_cleaned() {
        let m = method("Run", 0x1000, 0x10);
        assert_eq!(m.display_name(), "Tests.Run()");
        assert_eq!(m.display_name(), "Tests.Run()");
    }
}
