// RTDE utility functions for byte manipulation. Everything on the wire is big endian.

use crate::error::{UrError, UrResult};

#[derive(Debug, PartialEq, Eq)]
pub struct RTDEHeader {
    pub msg_size: u16,
    pub msg_cmd: u8,
}

pub const RTDE_HEADER_SIZE: usize = 3;

fn take<const N: usize>(data: &[u8], offset: &mut usize) -> UrResult<[u8; N]> {
    let end = *offset + N;
    let bytes = data.get(*offset..end).ok_or_else(|| {
        UrError::Protocol(format!(
            "Package too short: need {} bytes at offset {}, have {}",
            N,
            *offset,
            data.len()
        ))
    })?;
    *offset = end;
    // The slice is exactly N bytes long.
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

pub fn get_u64(data: &[u8], offset: &mut usize) -> UrResult<u64> {
    Ok(u64::from_be_bytes(take::<8>(data, offset)?))
}

pub fn get_u32(data: &[u8], offset: &mut usize) -> UrResult<u32> {
    Ok(u32::from_be_bytes(take::<4>(data, offset)?))
}

pub fn get_i32(data: &[u8], offset: &mut usize) -> UrResult<i32> {
    Ok(i32::from_be_bytes(take::<4>(data, offset)?))
}

pub fn get_u16(data: &[u8], offset: &mut usize) -> UrResult<u16> {
    Ok(u16::from_be_bytes(take::<2>(data, offset)?))
}

pub fn get_u8(data: &[u8], offset: &mut usize) -> UrResult<u8> {
    Ok(take::<1>(data, offset)?[0])
}

pub fn get_bool(data: &[u8], offset: &mut usize) -> UrResult<bool> {
    Ok(get_u8(data, offset)? != 0)
}

pub fn get_double(data: &[u8], offset: &mut usize) -> UrResult<f64> {
    Ok(f64::from_be_bytes(take::<8>(data, offset)?))
}

pub fn read_rtde_header(data: &[u8]) -> UrResult<RTDEHeader> {
    let mut offset = 0;
    Ok(RTDEHeader { msg_size: get_u16(data, &mut offset)?, msg_cmd: get_u8(data, &mut offset)? })
}

pub fn unpack_vector3d(data: &[u8], offset: &mut usize) -> UrResult<Vec<f64>> {
    (0..3).map(|_| get_double(data, offset)).collect()
}

pub fn unpack_vector6d(data: &[u8], offset: &mut usize) -> UrResult<Vec<f64>> {
    (0..6).map(|_| get_double(data, offset)).collect()
}

pub fn unpack_vector6_i32(data: &[u8], offset: &mut usize) -> UrResult<Vec<i32>> {
    (0..6).map(|_| get_i32(data, offset)).collect()
}

pub fn unpack_vector6_u32(data: &[u8], offset: &mut usize) -> UrResult<Vec<u32>> {
    (0..6).map(|_| get_u32(data, offset)).collect()
}

pub fn pack_double(value: f64) -> [u8; 8] {
    value.to_be_bytes()
}

#[cfg(test)]
pub fn pack_vector_n_double(vector: &[f64]) -> Vec<u8> {
    vector.iter().flat_map(|v| pack_double(*v)).collect()
}

/// Full RTDE package: size (header included) + command byte + payload.
pub fn pack_rtde_package(command: u8, payload: &[u8]) -> UrResult<Vec<u8>> {
    let size = u16::try_from(RTDE_HEADER_SIZE + payload.len())
        .map_err(|_| UrError::Protocol(format!("Payload too large: {} bytes", payload.len())))?;
    let mut out = Vec::with_capacity(size as usize);
    out.extend_from_slice(&size.to_be_bytes());
    out.push(command);
    out.extend_from_slice(payload);
    Ok(out)
}
