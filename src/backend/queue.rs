// Queue family selection
//
// Maps each requested capability onto a queue family, preferring the most
// specialized family, and never claims more queues from a family than the
// family exposes. All counters live in the selector, never in the device
// descriptor, so a selection pass can be thrown away without side effects.

use ash::vk;
use parking_lot::{Mutex, MutexGuard};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Kind of work a caller wants a queue for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Graphics,
    Compute,
    Transfer,
    Presentation,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::Graphics,
        Capability::Compute,
        Capability::Transfer,
        Capability::Presentation,
    ];

    /// Queue flag backing this capability.
    ///
    /// Presentation has none: it is a property of a (family, surface) pair.
    pub fn queue_flag(self) -> Option<vk::QueueFlags> {
        match self {
            Capability::Graphics => Some(vk::QueueFlags::GRAPHICS),
            Capability::Compute => Some(vk::QueueFlags::COMPUTE),
            Capability::Transfer => Some(vk::QueueFlags::TRANSFER),
            Capability::Presentation => None,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Graphics => "graphics",
            Capability::Compute => "compute",
            Capability::Transfer => "transfer",
            Capability::Presentation => "presentation",
        };
        f.write_str(name)
    }
}

fn scored_flags() -> vk::QueueFlags {
    vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER
}

/// One entry of a physical device's queue family table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamily {
    pub index: u32,
    pub flags: vk::QueueFlags,
    pub queue_count: u32,
}

impl QueueFamily {
    pub fn from_properties(index: u32, properties: &vk::QueueFamilyProperties) -> Self {
        Self {
            index,
            flags: properties.queue_flags,
            queue_count: properties.queue_count,
        }
    }

    /// Build a family table in driver order.
    pub fn table(properties: &[vk::QueueFamilyProperties]) -> Vec<Self> {
        properties
            .iter()
            .enumerate()
            .map(|(i, props)| Self::from_properties(i as u32, props))
            .collect()
    }

    /// Whether the family flags cover `capability`. Always false for presentation.
    pub fn supports(&self, capability: Capability) -> bool {
        capability
            .queue_flag()
            .is_some_and(|flag| self.flags.contains(flag))
    }

    /// Number of graphics/compute/transfer flags set. Lower is more specialized.
    pub fn specialization_score(&self) -> u32 {
        (self.flags & scored_flags()).as_raw().count_ones()
    }
}

/// Where a capability's queue comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment {
    /// One queue of `family` was claimed for this capability.
    Claimed { family: u32 },
    /// Presentation is served by the graphics queue; nothing was claimed.
    SharesGraphics { family: u32 },
}

impl Assignment {
    pub fn family(&self) -> u32 {
        match *self {
            Assignment::Claimed { family } | Assignment::SharesGraphics { family } => family,
        }
    }
}

/// Number of queues claimed per family during one selection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueAllocation {
    claims: BTreeMap<u32, u32>,
}

impl QueueAllocation {
    fn claim(&mut self, family: u32) {
        *self.claims.entry(family).or_insert(0) += 1;
    }

    pub fn claimed(&self, family: u32) -> u32 {
        self.claims.get(&family).copied().unwrap_or(0)
    }

    /// `(family, claimed count)` in ascending family order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.claims.iter().map(|(&family, &count)| (family, count))
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    pub fn total(&self) -> u32 {
        self.claims.values().sum()
    }
}

/// Stateful selector for a single device evaluation.
///
/// Every claim made through [`select`](Self::select) or
/// [`select_presentation`](Self::select_presentation) is visible to the
/// calls that follow it.
#[derive(Debug)]
pub struct QueueFamilySelector<'a> {
    families: &'a [QueueFamily],
    remaining: Vec<u32>,
    allocation: QueueAllocation,
}

impl<'a> QueueFamilySelector<'a> {
    pub fn new(families: &'a [QueueFamily]) -> Self {
        Self {
            families,
            remaining: families.iter().map(|f| f.queue_count).collect(),
            allocation: QueueAllocation::default(),
        }
    }

    /// Queues of `family` not yet claimed in this pass.
    pub fn remaining(&self, family: u32) -> u32 {
        self.position(family)
            .map(|position| self.remaining[position])
            .unwrap_or(0)
    }

    pub fn allocation(&self) -> &QueueAllocation {
        &self.allocation
    }

    /// Claim a queue for a graphics, compute or transfer request.
    ///
    /// Returns `None` when no family with free queues supports the
    /// capability, or when asked for presentation.
    pub fn select(&mut self, capability: Capability) -> Option<u32> {
        let flag = capability.queue_flag()?;
        let families = self.families;

        let (position, family) = families
            .iter()
            .enumerate()
            .filter(|(position, family)| {
                family.flags.contains(flag) && self.remaining[*position] > 0
            })
            .min_by_key(|(_, family)| family.specialization_score())?;

        let index = family.index;
        self.claim(position, index);
        log::debug!(
            "{} -> queue family {} (score {}, {} left)",
            capability,
            index,
            family.specialization_score(),
            self.remaining[position]
        );
        Some(index)
    }

    /// Pick the presentation family.
    ///
    /// `supports_present` answers whether a family index can present to the
    /// target surface. The graphics family is reused without a new claim when
    /// it can present; otherwise the first presenting family with a free
    /// queue is claimed.
    pub fn select_presentation<E, F>(
        &mut self,
        graphics: Option<u32>,
        mut supports_present: F,
    ) -> Result<Option<Assignment>, E>
    where
        F: FnMut(u32) -> Result<bool, E>,
    {
        if let Some(graphics) = graphics {
            if supports_present(graphics)? {
                log::debug!("presentation shares graphics queue family {}", graphics);
                return Ok(Some(Assignment::SharesGraphics { family: graphics }));
            }
        }

        let families = self.families;
        for (position, family) in families.iter().enumerate() {
            if Some(family.index) == graphics || self.remaining[position] == 0 {
                continue;
            }
            if supports_present(family.index)? {
                self.claim(position, family.index);
                log::debug!("presentation -> queue family {}", family.index);
                return Ok(Some(Assignment::Claimed {
                    family: family.index,
                }));
            }
        }

        log::debug!("no queue family can present to the surface");
        Ok(None)
    }

    pub fn finish(self) -> QueueAllocation {
        self.allocation
    }

    fn position(&self, family: u32) -> Option<usize> {
        self.families.iter().position(|f| f.index == family)
    }

    fn claim(&mut self, position: usize, family: u32) {
        self.remaining[position] -= 1;
        self.allocation.claim(family);
    }
}

/// Outcome of a full selection pass over one device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueSelection {
    // Claim order: materialization resolves queue indices in this order.
    assignments: Vec<(Capability, Option<Assignment>)>,
    allocation: QueueAllocation,
}

impl QueueSelection {
    pub fn assignment(&self, capability: Capability) -> Option<Assignment> {
        self.assignments
            .iter()
            .find(|(c, _)| *c == capability)
            .and_then(|(_, assignment)| *assignment)
    }

    pub fn family(&self, capability: Capability) -> Option<u32> {
        self.assignment(capability).map(|a| a.family())
    }

    /// Every requested capability, in the order its queue was claimed.
    pub fn assignments(&self) -> &[(Capability, Option<Assignment>)] {
        &self.assignments
    }

    pub fn allocation(&self) -> &QueueAllocation {
        &self.allocation
    }
}

/// Run one selection pass for `requests` over `families`.
///
/// Duplicate requests are ignored. Graphics, compute and transfer are
/// resolved in request order first; presentation is resolved last so it can
/// reuse the graphics family whatever its position in `requests`.
pub fn select_queues<E, F>(
    families: &[QueueFamily],
    requests: &[Capability],
    supports_present: F,
) -> Result<QueueSelection, E>
where
    F: FnMut(u32) -> Result<bool, E>,
{
    let mut unique: Vec<Capability> = Vec::with_capacity(requests.len());
    for &capability in requests {
        if !unique.contains(&capability) {
            unique.push(capability);
        }
    }

    let mut selector = QueueFamilySelector::new(families);
    let mut assignments = Vec::with_capacity(unique.len());

    for &capability in unique.iter().filter(|c| **c != Capability::Presentation) {
        let assignment = selector
            .select(capability)
            .map(|family| Assignment::Claimed { family });
        assignments.push((capability, assignment));
    }

    if unique.contains(&Capability::Presentation) {
        let graphics = assignments
            .iter()
            .find(|(c, _)| *c == Capability::Graphics)
            .and_then(|(_, a)| a.map(|a| a.family()));
        let assignment = selector.select_presentation(graphics, supports_present)?;
        assignments.push((Capability::Presentation, assignment));
    }

    Ok(QueueSelection {
        assignments,
        allocation: selector.finish(),
    })
}

/// A queue retrieved from a logical device.
///
/// Vulkan queues are not internally synchronized. Submissions to the same
/// native queue must be serialized; [`Queue::lock`] does that, and clones of
/// a `Queue` (e.g. presentation sharing the graphics queue) share the lock.
#[derive(Debug, Clone)]
pub struct Queue {
    handle: vk::Queue,
    family_index: u32,
    queue_index: u32,
    submit_lock: Arc<Mutex<()>>,
}

impl Queue {
    pub(crate) fn new(handle: vk::Queue, family_index: u32, queue_index: u32) -> Self {
        Self {
            handle,
            family_index,
            queue_index,
            submit_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Raw handle without taking the submission lock.
    pub fn raw(&self) -> vk::Queue {
        self.handle
    }

    pub fn family_index(&self) -> u32 {
        self.family_index
    }

    /// Index of this queue inside its family.
    pub fn queue_index(&self) -> u32 {
        self.queue_index
    }

    /// Whether `other` refers to the same native queue.
    pub fn same_queue(&self, other: &Queue) -> bool {
        self.family_index == other.family_index && self.queue_index == other.queue_index
    }

    /// Exclusive access for submission.
    pub fn lock(&self) -> QueueGuard<'_> {
        QueueGuard {
            queue: self.handle,
            _guard: self.submit_lock.lock(),
        }
    }
}

pub struct QueueGuard<'a> {
    queue: vk::Queue,
    _guard: MutexGuard<'a, ()>,
}

impl Deref for QueueGuard<'_> {
    type Target = vk::Queue;

    fn deref(&self) -> &vk::Queue {
        &self.queue
    }
}
