use crate::error::{BackendError, Result};

/// Coordinates of one logical work-item.
///
/// Axes beyond the launch dimension report 0 for ids and 1 for sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkItem {
    global_id: [u32; 3],
    local_id: [u32; 3],
    group_id: [u32; 3],
    work_size: [u32; 3],
    global_offset: [u32; 3],
}

impl WorkItem {
    /// Global id including the launch's global offset.
    pub fn global_id(&self, axis: usize) -> u32 {
        self.global_id.get(axis).copied().unwrap_or(0)
    }

    pub fn local_id(&self, axis: usize) -> u32 {
        self.local_id.get(axis).copied().unwrap_or(0)
    }

    pub fn group_id(&self, axis: usize) -> u32 {
        self.group_id.get(axis).copied().unwrap_or(0)
    }

    pub fn global_size(&self, axis: usize) -> u32 {
        self.work_size.get(axis).copied().unwrap_or(1)
    }

    /// Row-major index of this item within the work size, offset removed.
    pub fn linear_id(&self) -> u64 {
        let x = (self.global_id[0] - self.global_offset[0]) as u64;
        let y = (self.global_id[1] - self.global_offset[1]) as u64;
        let z = (self.global_id[2] - self.global_offset[2]) as u64;
        let wx = self.work_size[0] as u64;
        let wy = self.work_size[1] as u64;
        x + wx * (y + wy * z)
    }
}

/// Work-group tiling of a kernel launch.
///
/// Group dimensions come from the device's fixed work-group size; group
/// counts round up, and items of a partial tail group that fall outside the
/// work size are never produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchGeometry {
    dimension: u32,
    work_size: [u32; 3],
    global_offset: [u32; 3],
    group_size: [u32; 3],
    group_count: [u32; 3],
}

impl LaunchGeometry {
    /// `global_offset` may be empty (all zero) or have `dimension` entries.
    pub fn new(
        dimension: u32,
        work_size: &[u32],
        global_offset: &[u32],
        work_group_size: u32,
        max_group_count: [u32; 3],
    ) -> Result<Self> {
        if !(1..=3).contains(&dimension) {
            return Err(BackendError::InvalidLaunch(format!(
                "dimension must be 1, 2 or 3, got {dimension}"
            )));
        }
        let dims = dimension as usize;
        if work_size.len() != dims {
            return Err(BackendError::InvalidLaunch(format!(
                "work size has {} component(s) for a {dimension}-dimensional launch",
                work_size.len()
            )));
        }
        if !global_offset.is_empty() && global_offset.len() != dims {
            return Err(BackendError::InvalidLaunch(format!(
                "global id offset has {} component(s) for a {dimension}-dimensional launch",
                global_offset.len()
            )));
        }
        if work_group_size == 0 {
            return Err(BackendError::InvalidLaunch("work-group size is zero".to_string()));
        }

        let group_size = Self::group_dims(work_group_size, dimension);
        let mut geometry = Self {
            dimension,
            work_size: [1; 3],
            global_offset: [0; 3],
            group_size,
            group_count: [1; 3],
        };

        for axis in 0..dims {
            let work = work_size[axis];
            let offset = global_offset.get(axis).copied().unwrap_or(0);
            if work > 0 && offset.checked_add(work - 1).is_none() {
                return Err(BackendError::InvalidLaunch(format!(
                    "axis {axis}: offset {offset} + work size {work} overflows the id range"
                )));
            }
            let groups = work.div_ceil(group_size[axis]);
            if groups > max_group_count[axis] {
                return Err(BackendError::InvalidLaunch(format!(
                    "axis {axis}: {groups} work-groups exceed the device limit of {}",
                    max_group_count[axis]
                )));
            }
            geometry.work_size[axis] = work;
            geometry.global_offset[axis] = offset;
            geometry.group_count[axis] = groups;
        }

        Ok(geometry)
    }

    /// Split a work-group size across `dimension` axes.
    ///
    /// Powers of two are divided bit by bit starting with x, so 128 becomes
    /// `[128]`, `[16, 8]` or `[8, 4, 4]`. Other sizes stay on the x axis.
    pub fn group_dims(work_group_size: u32, dimension: u32) -> [u32; 3] {
        let mut dims = [1u32; 3];
        if work_group_size.is_power_of_two() {
            let active = dimension.clamp(1, 3) as usize;
            for bit in 0..work_group_size.trailing_zeros() as usize {
                dims[bit % active] <<= 1;
            }
        } else {
            dims[0] = work_group_size.max(1);
        }
        dims
    }

    pub fn dimension(&self) -> u32 {
        self.dimension
    }

    pub fn work_size(&self) -> [u32; 3] {
        self.work_size
    }

    pub fn global_offset(&self) -> [u32; 3] {
        self.global_offset
    }

    pub fn group_size(&self) -> [u32; 3] {
        self.group_size
    }

    pub fn group_count(&self) -> [u32; 3] {
        self.group_count
    }

    /// Number of logical work-items (product of the work size).
    pub fn total_items(&self) -> u64 {
        self.work_size.iter().map(|&w| w as u64).product()
    }

    pub fn total_groups(&self) -> u64 {
        self.group_count.iter().map(|&g| g as u64).product()
    }

    /// The in-range work-items of group `group` (row-major group index).
    pub fn group_items(&self, group: u64) -> impl Iterator<Item = WorkItem> + '_ {
        let gx = self.group_count[0] as u64;
        let gy = self.group_count[1] as u64;
        let group_id = [
            (group % gx) as u32,
            ((group / gx) % gy) as u32,
            (group / (gx * gy)) as u32,
        ];
        let [sx, sy, sz] = self.group_size;

        (0..sz).flat_map(move |lz| {
            (0..sy).flat_map(move |ly| {
                (0..sx).filter_map(move |lx| {
                    let local_id = [lx, ly, lz];
                    let mut global_id = [0u32; 3];
                    for axis in 0..3 {
                        let id = group_id[axis] as u64 * self.group_size[axis] as u64 + local_id[axis] as u64;
                        if id >= self.work_size[axis] as u64 {
                            return None;
                        }
                        global_id[axis] = id as u32 + self.global_offset[axis];
                    }
                    Some(WorkItem {
                        global_id,
                        local_id,
                        group_id,
                        work_size: self.work_size,
                        global_offset: self.global_offset,
                    })
                })
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const UNLIMITED: [u32; 3] = [u32::MAX; 3];

    #[test]
    fn splits_power_of_two_group_sizes() {
        assert_eq!(LaunchGeometry::group_dims(128, 1), [128, 1, 1]);
        assert_eq!(LaunchGeometry::group_dims(128, 2), [16, 8, 1]);
        assert_eq!(LaunchGeometry::group_dims(128, 3), [8, 4, 4]);
        assert_eq!(LaunchGeometry::group_dims(64, 3), [4, 4, 4]);
        assert_eq!(LaunchGeometry::group_dims(96, 2), [96, 1, 1]);
    }

    #[test]
    fn tail_items_are_skipped() {
        let geometry = LaunchGeometry::new(1, &[130], &[], 64, UNLIMITED).unwrap();
        assert_eq!(geometry.group_count(), [3, 1, 1]);

        let ids: Vec<u32> = (0..geometry.total_groups())
            .flat_map(|g| geometry.group_items(g).map(|item| item.global_id(0)).collect::<Vec<_>>())
            .collect();
        assert_eq!(ids.len(), 130);
        assert_eq!(ids, (0..130).collect::<Vec<_>>());
    }

    #[test]
    fn every_item_visited_once_in_three_dimensions() {
        let geometry = LaunchGeometry::new(3, &[5, 7, 3], &[10, 0, 2], 32, UNLIMITED).unwrap();
        assert_eq!(geometry.total_items(), 105);

        let mut seen = HashSet::new();
        for group in 0..geometry.total_groups() {
            for item in geometry.group_items(group) {
                assert!(item.global_id(0) >= 10 && item.global_id(0) < 15);
                assert!(item.global_id(2) >= 2 && item.global_id(2) < 5);
                assert!(seen.insert(item.linear_id()));
            }
        }
        assert_eq!(seen.len(), 105);
        assert_eq!(seen.iter().max().copied(), Some(104));
    }

    #[test]
    fn rejects_bad_launches() {
        assert!(LaunchGeometry::new(0, &[], &[], 64, UNLIMITED).is_err());
        assert!(LaunchGeometry::new(2, &[4], &[], 64, UNLIMITED).is_err());
        assert!(LaunchGeometry::new(1, &[4], &[1, 2], 64, UNLIMITED).is_err());
        assert!(LaunchGeometry::new(1, &[16], &[u32::MAX], 64, UNLIMITED).is_err());
        assert!(LaunchGeometry::new(1, &[1024], &[], 64, [8, 1, 1]).is_err());
    }

    #[test]
    fn empty_work_size_has_no_groups() {
        let geometry = LaunchGeometry::new(2, &[0, 8], &[], 64, UNLIMITED).unwrap();
        assert_eq!(geometry.total_items(), 0);
        assert_eq!(geometry.total_groups(), 0);
    }
}
