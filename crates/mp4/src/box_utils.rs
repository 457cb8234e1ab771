/// Parsed view over a single ISOBMFF box inside a parent byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BoxView {
    pub(crate) start: usize,
    pub(crate) end: usize,
    pub(crate) size: usize,
    pub(crate) header_size: usize,
    pub(crate) fourcc: [u8; 4],
    pub(crate) body_start: usize,
    pub(crate) body_end: usize,
}

/// Read a box header: returns `(total_box_size, fourcc, header_size)`.
///
/// Handles 32-bit size, 64-bit extended size (`size == 1`),
/// and box-extends-to-EOF (`size == 0`). For the latter the returned size is
/// `fallback_len`, the number of bytes the caller knows are available.
pub(crate) fn read_box_header(data: &[u8], fallback_len: u64) -> Option<(u64, [u8; 4], usize)> {
    if data.len() < 8 {
        return None;
    }

    let size = read_u32(data, 0)? as u64;
    let fourcc: [u8; 4] = [data[4], data[5], data[6], data[7]];

    match size {
        1 => Some((read_u64(data, 8)?, fourcc, 16)),
        0 => Some((fallback_len, fourcc, 8)),
        _ => Some((size, fourcc, 8)),
    }
}

/// Parse a single box located at `offset` within `[0..end)`.
pub(crate) fn box_at(data: &[u8], offset: usize, end: usize) -> Option<BoxView> {
    if offset >= end || end > data.len() {
        return None;
    }

    let remaining = &data[offset..end];
    let (size, fourcc, header_size) = read_box_header(remaining, remaining.len() as u64)?;
    let size = usize::try_from(size).ok()?;

    if size < header_size || offset.checked_add(size)? > end {
        return None;
    }

    Some(BoxView {
        start: offset,
        end: offset + size,
        size,
        header_size,
        fourcc,
        body_start: offset + header_size,
        body_end: offset + size,
    })
}

/// Parse every child box inside `[start..end)`.
///
/// Returns `None` if any child overruns the range.
pub(crate) fn children(data: &[u8], start: usize, end: usize) -> Option<Vec<BoxView>> {
    let mut out = Vec::new();
    let mut offset = start;
    while offset < end {
        let parsed = box_at(data, offset, end)?;
        offset = parsed.end;
        out.push(parsed);
    }
    Some(out)
}

/// Find the first child box with the given FourCC inside `[start..end)`.
pub(crate) fn find_first_box(
    data: &[u8],
    start: usize,
    end: usize,
    target: [u8; 4],
) -> Option<BoxView> {
    let mut offset = start;
    while offset < end {
        let parsed = box_at(data, offset, end)?;
        if parsed.fourcc == target {
            return Some(parsed);
        }

        offset = parsed.end;
    }

    None
}

/// Walk a chain of nested boxes, e.g. `[mdia, mdhd]` under a `trak` body.
pub(crate) fn find_path(
    data: &[u8],
    start: usize,
    end: usize,
    path: &[[u8; 4]],
) -> Option<BoxView> {
    let (first, rest) = path.split_first()?;
    let found = find_first_box(data, start, end, *first)?;
    if rest.is_empty() {
        Some(found)
    } else {
        find_path(data, found.body_start, found.body_end, rest)
    }
}

pub(crate) fn read_u32(data: &[u8], pos: usize) -> Option<u32> {
    let bytes = data.get(pos..pos.checked_add(4)?)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub(crate) fn read_u64(data: &[u8], pos: usize) -> Option<u64> {
    let bytes = data.get(pos..pos.checked_add(8)?)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Some(u64::from_be_bytes(buf))
}

/// FullBox version and 24-bit flags at the start of a box body.
pub(crate) fn full_box_header(data: &[u8], body_start: usize) -> Option<(u8, u32)> {
    let word = read_u32(data, body_start)?;
    Some(((word >> 24) as u8, word & 0x00FF_FFFF))
}

pub(crate) fn write_u32(data: &mut [u8], pos: usize, value: u32) -> Option<()> {
    data.get_mut(pos..pos.checked_add(4)?)?
        .copy_from_slice(&value.to_be_bytes());
    Some(())
}

pub(crate) fn write_u64(data: &mut [u8], pos: usize, value: u64) -> Option<()> {
    data.get_mut(pos..pos.checked_add(8)?)?
        .copy_from_slice(&value.to_be_bytes());
    Some(())
}

/// Serialize a box with a compact 32-bit header.
pub(crate) fn write_box(out: &mut Vec<u8>, fourcc: &[u8; 4], body: &[u8]) {
    out.extend_from_slice(&((8 + body.len()) as u32).to_be_bytes());
    out.extend_from_slice(fourcc);
    out.extend_from_slice(body);
}

pub(crate) fn fourcc_to_string(fourcc: &[u8; 4]) -> String {
    fourcc
        .iter()
        .map(|&b| if b.is_ascii_graphic() { b as char } else { '.' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extended_and_open_ended_sizes() {
        let mut large = vec![0, 0, 0, 1];
        large.extend_from_slice(b"mdat");
        large.extend_from_slice(&24u64.to_be_bytes());
        large.extend_from_slice(&[0u8; 8]);
        let view = box_at(&large, 0, large.len()).unwrap();
        assert_eq!(view.header_size, 16);
        assert_eq!(view.size, 24);
        assert_eq!(view.body_end - view.body_start, 8);

        let mut open = vec![0, 0, 0, 0];
        open.extend_from_slice(b"mdat");
        open.extend_from_slice(&[1, 2, 3]);
        let view = box_at(&open, 0, open.len()).unwrap();
        assert_eq!(view.size, 11);
    }

    #[test]
    fn overrunning_child_is_rejected() {
        let mut data = Vec::new();
        write_box(&mut data, b"free", &[0u8; 4]);
        data.extend_from_slice(&64u32.to_be_bytes());
        data.extend_from_slice(b"skip");
        assert!(children(&data, 0, data.len()).is_none());
        assert_eq!(children(&data, 0, 12).unwrap().len(), 1);
    }

    #[test]
    fn find_path_descends() {
        let mut inner = Vec::new();
        write_box(&mut inner, b"mdhd", &[9u8; 4]);
        let mut mdia = Vec::new();
        write_box(&mut mdia, b"mdia", &inner);
        let mut trak = Vec::new();
        write_box(&mut trak, b"trak", &mdia);

        let view = find_path(&trak, 0, trak.len(), &[*b"trak", *b"mdia", *b"mdhd"]).unwrap();
        assert_eq!(&trak[view.body_start..view.body_end], &[9u8; 4]);
        assert!(find_path(&trak, 0, trak.len(), &[*b"trak", *b"minf"]).is_none());
    }
}
