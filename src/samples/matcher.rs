// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Matching played notes against an instrument's regions.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::instrument::{CcRanges, Range};
use crate::config::{Group, InstrumentDescriptor, Region};

const FULL_RANGE: Range = [0, 127];

/// A region that matched a played note.
#[derive(Clone, Copy, Debug)]
pub struct MatchedRegion<'a> {
    /// Buffer key of the sample to play.
    pub sample: &'a str,
    /// The note the sample is tuned to. The played note if the region never said.
    pub pitch: u8,
    /// Exclusive group the voice belongs to.
    pub group: Option<u32>,
    /// Exclusive group silenced by this trigger.
    pub off_by: Option<u32>,
    pub source_group: &'a Group,
    pub region: &'a Region,
}

/// Key, velocity and controller constraints with absent bounds filled in.
#[derive(Debug)]
struct Filter {
    key: Range,
    velocity: Range,
    controllers: Vec<(u8, Range)>,
}

impl Filter {
    fn new(key: Option<Range>, velocity: Option<Range>, controllers: &CcRanges) -> Filter {
        Filter {
            key: key.unwrap_or(FULL_RANGE),
            velocity: velocity.unwrap_or(FULL_RANGE),
            controllers: controllers.iter().map(|(cc, range)| (*cc, *range)).collect(),
        }
    }

    fn accepts(&self, midi: u8, velocity: u8, cc_state: &HashMap<u8, u8>) -> bool {
        in_range(self.key, midi)
            && in_range(self.velocity, velocity)
            && self.controllers.iter().all(|(cc, range)| {
                in_range(*range, cc_state.get(cc).copied().unwrap_or_default())
            })
    }
}

fn in_range(range: Range, value: u8) -> bool {
    range[0] <= value && value <= range[1]
}

#[derive(Debug)]
struct NormalizedRegion {
    filter: Filter,
    /// Zero-based round robin slot.
    slot: usize,
}

#[derive(Debug)]
struct NormalizedGroup {
    filter: Filter,
    seq_length: Option<usize>,
    regions: Vec<NormalizedRegion>,
}

/// Finds the regions of an instrument that should sound for a played note.
///
/// Each round robin group carries its own counter. The counter advances every
/// time the group itself matches, whether or not a region in the current slot did.
pub struct RegionMatcher {
    descriptor: Arc<InstrumentDescriptor>,
    groups: Vec<NormalizedGroup>,
    counters: Vec<AtomicUsize>,
}

impl RegionMatcher {
    /// Normalizes the descriptor's groups and regions for matching.
    pub fn new(descriptor: Arc<InstrumentDescriptor>) -> RegionMatcher {
        let groups: Vec<NormalizedGroup> = descriptor
            .groups()
            .iter()
            .map(|group| NormalizedGroup {
                filter: Filter::new(group.key_range(), group.vel_range(), group.cc_range()),
                seq_length: group.seq_length().map(|length| length as usize),
                regions: group
                    .regions()
                    .iter()
                    .map(|region| NormalizedRegion {
                        filter: Filter::new(
                            region.key_range(),
                            region.vel_range(),
                            region.cc_range(),
                        ),
                        slot: region.seq_position().unwrap_or(1).saturating_sub(1) as usize,
                    })
                    .collect(),
            })
            .collect();
        let counters = groups.iter().map(|_| AtomicUsize::new(0)).collect();

        RegionMatcher {
            descriptor,
            groups,
            counters,
        }
    }

    /// Gets the descriptor this matcher was built from.
    pub fn descriptor(&self) -> &Arc<InstrumentDescriptor> {
        &self.descriptor
    }

    /// Returns every region matching the note, in descriptor order. Controllers
    /// missing from `cc_state` read as zero.
    pub fn find(
        &self,
        midi: u8,
        velocity: u8,
        cc_state: &HashMap<u8, u8>,
    ) -> Vec<MatchedRegion<'_>> {
        let mut matches = Vec::new();

        let groups = self
            .descriptor
            .groups()
            .iter()
            .zip(&self.groups)
            .zip(&self.counters);
        for ((group, normalized), counter) in groups {
            if !normalized.filter.accepts(midi, velocity, cc_state) {
                continue;
            }

            let slot = normalized
                .seq_length
                .map(|length| counter.fetch_add(1, Ordering::Relaxed) % length);

            for (region, normalized_region) in group.regions().iter().zip(&normalized.regions) {
                if !normalized_region.filter.accepts(midi, velocity, cc_state) {
                    continue;
                }
                if slot.is_some_and(|slot| slot != normalized_region.slot) {
                    continue;
                }

                matches.push(MatchedRegion {
                    sample: region.sample(),
                    pitch: region.pitch().unwrap_or(midi),
                    group: region.group().or(group.group()),
                    off_by: region.off_by().or(group.off_by()),
                    source_group: group,
                    region,
                });
            }
        }

        matches
    }
}

impl fmt::Debug for RegionMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionMatcher")
            .field("groups", &self.groups.len())
            .field("regions", &self.descriptor.region_count())
            .finish()
    }
}
