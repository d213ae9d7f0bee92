// Copyright @yucwang 2026

use std::collections::HashMap;

use super::DevicePtr;
use crate::core::error::{DeviceErrorCode, RenderError, Result};

const OFFSET_BITS: u32 = 32;
const OFFSET_MASK: u64 = (1u64 << OFFSET_BITS) - 1;

/// Allocation arena behind device addresses.
#[derive(Default)]
pub struct DeviceMemory {
    next_id: u32,
    allocations: HashMap<u32, Vec<u8>>,
    bytes_in_use: usize,
}

fn split(ptr: DevicePtr) -> (u32, usize) {
    ((ptr >> OFFSET_BITS) as u32, (ptr & OFFSET_MASK) as usize)
}

fn out_of_bounds(ptr: DevicePtr, len: usize) -> RenderError {
    RenderError::device(DeviceErrorCode::OutOfBounds,
                        format!("access of {} bytes at {:#018x} is outside any allocation", len, ptr))
}

impl DeviceMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, size: usize) -> Result<DevicePtr> {
        if size as u64 > OFFSET_MASK {
            return Err(RenderError::device(DeviceErrorCode::OutOfMemory,
                                           format!("allocation of {} bytes exceeds the address range", size)));
        }
        self.next_id = self.next_id.checked_add(1).ok_or_else(|| {
            RenderError::device(DeviceErrorCode::OutOfMemory, "allocation ids exhausted")
        })?;
        self.allocations.insert(self.next_id, vec![0u8; size]);
        self.bytes_in_use += size;
        Ok((self.next_id as u64) << OFFSET_BITS)
    }

    pub fn free(&mut self, ptr: DevicePtr) -> Result<()> {
        let (id, offset) = split(ptr);
        if offset != 0 {
            return Err(RenderError::device(DeviceErrorCode::InvalidValue,
                                           format!("{:#018x} is not the base of an allocation", ptr)));
        }
        match self.allocations.remove(&id) {
            Some(block) => {
                self.bytes_in_use -= block.len();
                Ok(())
            }
            None => Err(RenderError::device(DeviceErrorCode::InvalidValue,
                                            format!("double free or unknown pointer {:#018x}", ptr))),
        }
    }

    pub fn read(&self, ptr: DevicePtr, len: usize) -> Result<&[u8]> {
        let (id, offset) = split(ptr);
        let block = self.allocations.get(&id).ok_or_else(|| out_of_bounds(ptr, len))?;
        let end = offset.checked_add(len).ok_or_else(|| out_of_bounds(ptr, len))?;
        block.get(offset..end).ok_or_else(|| out_of_bounds(ptr, len))
    }

    pub fn write(&mut self, ptr: DevicePtr, data: &[u8]) -> Result<()> {
        let (id, offset) = split(ptr);
        let block = self.allocations.get_mut(&id).ok_or_else(|| out_of_bounds(ptr, data.len()))?;
        let end = offset.checked_add(data.len()).ok_or_else(|| out_of_bounds(ptr, data.len()))?;
        let target = block.get_mut(offset..end).ok_or_else(|| out_of_bounds(ptr, data.len()))?;
        target.copy_from_slice(data);
        Ok(())
    }

    pub fn fill(&mut self, ptr: DevicePtr, value: u8, len: usize) -> Result<()> {
        let (id, offset) = split(ptr);
        let block = self.allocations.get_mut(&id).ok_or_else(|| out_of_bounds(ptr, len))?;
        let end = offset.checked_add(len).ok_or_else(|| out_of_bounds(ptr, len))?;
        let target = block.get_mut(offset..end).ok_or_else(|| out_of_bounds(ptr, len))?;
        target.fill(value);
        Ok(())
    }

    pub fn live_allocations(&self) -> usize {
        self.allocations.len()
    }

    pub fn bytes_in_use(&self) -> usize {
        self.bytes_in_use
    }
}
