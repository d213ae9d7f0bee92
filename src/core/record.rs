// Copyright @yucwang 2026

use bytemuck::Pod;

use crate::core::error::Result;
use crate::device::{DeviceApi, ProgramGroupHandle, SBT_RECORD_HEADER_SIZE};

/// Header written by the device followed by a plugin payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SbtRecord {
    group: ProgramGroupHandle,
    bytes: Vec<u8>,
}

impl SbtRecord {
    pub fn pack<T: Pod>(device: &dyn DeviceApi, group: ProgramGroupHandle, payload: &T) -> Result<SbtRecord> {
        let payload = bytemuck::bytes_of(payload);
        let mut bytes = vec![0u8; SBT_RECORD_HEADER_SIZE + payload.len()];
        device.write_record_header(group, &mut bytes[..SBT_RECORD_HEADER_SIZE])?;
        bytes[SBT_RECORD_HEADER_SIZE..].copy_from_slice(payload);
        Ok(SbtRecord { group, bytes })
    }

    pub fn pack_empty(device: &dyn DeviceApi, group: ProgramGroupHandle) -> Result<SbtRecord> {
        let mut bytes = vec![0u8; SBT_RECORD_HEADER_SIZE];
        device.write_record_header(group, &mut bytes)?;
        Ok(SbtRecord { group, bytes })
    }

    /// Program group the record was packed for; never leaves the host.
    pub fn group(&self) -> ProgramGroupHandle {
        self.group
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[SBT_RECORD_HEADER_SIZE..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::{DeviceErrorCode, RenderError};
    use crate::device::kernel::{KernelFragment, KernelLibrary};
    use crate::device::launch::KernelContext;
    use crate::device::{ProgramEntry, ProgramGroupDesc, SoftwareDevice};

    #[repr(C)]
    #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
    struct Payload {
        texture: u64,
        scale: [f32; 3],
        callable: u32,
    }

    fn noop(_ctx: &mut KernelContext<'_>, _args: &mut [u8]) {}

    fn device_with_group() -> (SoftwareDevice, ProgramGroupHandle) {
        let mut library = KernelLibrary::new();
        library.install(KernelFragment::new("test/Record.kernel").export("__direct_callable__noop", noop, 0));
        let device = SoftwareDevice::with_threads(1);
        let module = device.create_module(library.link("__direct_callable__noop", &["test/Record.kernel".into()]).unwrap()).unwrap();
        let group = device.create_program_group(&ProgramGroupDesc::DirectCallable(
            ProgramEntry::new(module, "__direct_callable__noop"))).unwrap();
        (device, group)
    }

    #[test]
    fn test_pack_is_deterministic() {
        let (device, group) = device_with_group();
        let payload = Payload { texture: 0xdead_beef, scale: [0.5, 1.0, 2.0], callable: 7 };

        let a = SbtRecord::pack(&device, group, &payload).unwrap();
        let b = SbtRecord::pack(&device, group, &payload).unwrap();
        assert_eq!(a.len(), SBT_RECORD_HEADER_SIZE + std::mem::size_of::<Payload>());
        assert_eq!(a.payload(), bytemuck::bytes_of(&payload));
        assert_eq!(a, b);
        assert_eq!(a.group(), group);

        let empty = SbtRecord::pack_empty(&device, group).unwrap();
        assert_eq!(empty.len(), SBT_RECORD_HEADER_SIZE);
        assert_eq!(empty.bytes(), &a.bytes()[..SBT_RECORD_HEADER_SIZE]);
    }

    #[test]
    fn test_pack_with_destroyed_group_fails() {
        let (device, group) = device_with_group();
        device.destroy_program_group(group).unwrap();
        let err = SbtRecord::pack(&device, group, &1u32).unwrap_err();
        assert!(matches!(err, RenderError::Device { code: DeviceErrorCode::InvalidHandle, .. }));
    }
}
