//! Hand-built test archive
//!
//! Builds a complete, all-uncompressed SquashFS 4.0 image in memory.
//! Every metablock carries the stored-uncompressed bit and every data
//! block the uncompressed bit, so the image exercises the whole read
//! path without invoking a codec.
//!
//! Contents:
//!
//! ```text
//! /                   basic dir, uid 2020, gid 202020
//! /a                  ext file, "a\n", xattr user.foo (inline)
//! /b                  ext file, 5000 x 'b', one full block plus a
//!                     fragment tail, xattr user.bar (indirect)
//! /large_dir          ext dir with a two-record index, two listing
//!                     fragments
//! /large_dir/cdev     character device 0x0103
//! /large_dir/f00..f04 empty basic files
//! /large_dir/fifo     named pipe
//! /large_dir/link     symlink -> /
//! /large_dir/loop     symlink -> loop2
//! /large_dir/loop2    symlink -> loop
//! /large_dir/sparse   basic file, 8192 zero bytes, two sparse blocks
//! /large_dir/xlink    ext symlink -> sparse
//! /large_dir/zzz      basic file, "zzz\n"
//! ```

pub const BLOCK_SIZE: u32 = 4096;
pub const INODE_COUNT: u32 = 17;

pub const CDEV_NUMBER: u32 = 0x0103;

/// Shared xattr value of /a and /b
pub const XATTR_VALUE: &[u8] = b"1234567891234567891234567890001234567890";

pub const B_SIZE: usize = 5000;

const NO_FRAG: u32 = 0xffff_ffff;
const NO_SEGMENT: u64 = 0xffff_ffff_ffff_ffff;
const UNCOMPRESSED_BLOCK: u32 = 1 << 24;

/// Frame one metablock, zlib-compressing the payload when asked.
fn metablock_with(payload: &[u8], compress: bool) -> Vec<u8> {
    if compress {
        use std::io::Write;
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(payload).unwrap();
        let packed = encoder.finish().unwrap();
        assert!(packed.len() <= 8192);
        let mut out = (packed.len() as u16).to_le_bytes().to_vec();
        out.extend_from_slice(&packed);
        out
    } else {
        assert!(payload.len() <= 8192);
        let header = payload.len() as u16 | 1 << 15;
        let mut out = header.to_le_bytes().to_vec();
        out.extend_from_slice(payload);
        out
    }
}

fn inode_header(out: &mut Vec<u8>, kind: u16, uid: u16, gid: u16, inode_number: u32) {
    out.extend(kind.to_le_bytes());
    out.extend(0o755u16.to_le_bytes()); // permissions
    out.extend(uid.to_le_bytes());
    out.extend(gid.to_le_bytes());
    out.extend(0u32.to_le_bytes()); // mtime
    out.extend(inode_number.to_le_bytes());
}

#[allow(clippy::too_many_arguments)]
fn ext_file_inode(
    out: &mut Vec<u8>,
    inode_number: u32,
    blocks_start: u64,
    file_size: u64,
    frag_index: u32,
    frag_offset: u32,
    xattr_index: u32,
    block_sizes: &[u32],
) {
    inode_header(out, 9, 0, 0, inode_number);
    out.extend(blocks_start.to_le_bytes());
    out.extend(file_size.to_le_bytes());
    out.extend(0u64.to_le_bytes()); // sparse
    out.extend(1u32.to_le_bytes()); // link_count
    out.extend(frag_index.to_le_bytes());
    out.extend(frag_offset.to_le_bytes());
    out.extend(xattr_index.to_le_bytes());
    for size in block_sizes {
        out.extend(size.to_le_bytes());
    }
}

fn basic_file_inode(
    out: &mut Vec<u8>,
    inode_number: u32,
    blocks_start: u32,
    file_size: u32,
    block_sizes: &[u32],
) {
    inode_header(out, 2, 0, 0, inode_number);
    out.extend(blocks_start.to_le_bytes());
    out.extend(NO_FRAG.to_le_bytes());
    out.extend(0u32.to_le_bytes()); // block_offset
    out.extend(file_size.to_le_bytes());
    for size in block_sizes {
        out.extend(size.to_le_bytes());
    }
}

fn symlink_inode(out: &mut Vec<u8>, inode_number: u32, target: &[u8]) {
    inode_header(out, 3, 0, 0, inode_number);
    out.extend(1u32.to_le_bytes()); // link_count
    out.extend((target.len() as u32).to_le_bytes());
    out.extend_from_slice(target);
}

struct DirListing {
    bytes: Vec<u8>,
}

impl DirListing {
    fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    /// `entries`: `(name, inner_offset, inode_number, type)`
    fn fragment(&mut self, base_inode: u32, entries: &[(&[u8], u16, u32, u16)]) {
        self.bytes.extend((entries.len() as u32 - 1).to_le_bytes());
        self.bytes.extend(0u32.to_le_bytes()); // inode metablock start
        self.bytes.extend(base_inode.to_le_bytes());
        for (name, offset, inode_number, kind) in entries {
            self.bytes.extend(offset.to_le_bytes());
            let delta = (*inode_number as i64 - base_inode as i64) as i16;
            self.bytes.extend(delta.to_le_bytes());
            self.bytes.extend(kind.to_le_bytes());
            self.bytes.extend((name.len() as u16 - 1).to_le_bytes());
            self.bytes.extend_from_slice(*name);
        }
    }

    fn len(&self) -> usize {
        self.bytes.len()
    }
}

/// Build the canonical test image. `with_export` controls whether the
/// archive carries an export table.
pub fn build_image(with_export: bool) -> Vec<u8> {
    build(with_export, false)
}

/// The canonical image with every metadata block zlib-compressed.
pub fn build_image_compressed() -> Vec<u8> {
    build(true, true)
}

fn build(with_export: bool, compress_metadata: bool) -> Vec<u8> {
    let metablock = |payload: &[u8]| metablock_with(payload, compress_metadata);
    let mut image = vec![0u8; 96];

    // data area
    let a_start = image.len() as u64;
    image.extend_from_slice(b"a\n");
    let b_start = image.len() as u64;
    image.extend(std::iter::repeat(b'b').take(BLOCK_SIZE as usize));
    let z_start = image.len() as u64;
    image.extend_from_slice(b"zzz\n");
    let frag_start = image.len() as u64;
    image.extend(std::iter::repeat(b'b').take(B_SIZE - BLOCK_SIZE as usize));
    let sparse_start = image.len() as u64;

    // inode table: one metablock, inode 13 second-to-last, 14 last
    let mut inodes = Vec::new();
    let mut ino_off = [0u16; INODE_COUNT as usize + 1];
    let note = |n: u32, inodes: &Vec<u8>, ino_off: &mut [u16]| {
        ino_off[n as usize] = inodes.len() as u16;
    };

    note(1, &inodes, &mut ino_off); // /a
    ext_file_inode(&mut inodes, 1, a_start, 2, NO_FRAG, 0, 0, &[2 | UNCOMPRESSED_BLOCK]);
    note(2, &inodes, &mut ino_off); // /b
    ext_file_inode(
        &mut inodes,
        2,
        b_start,
        B_SIZE as u64,
        0,
        0,
        1,
        &[BLOCK_SIZE | UNCOMPRESSED_BLOCK],
    );
    for n in 3..=7 {
        note(n, &inodes, &mut ino_off); // /large_dir/f00..f04
        basic_file_inode(&mut inodes, n, 0, 0, &[]);
    }
    note(8, &inodes, &mut ino_off);
    symlink_inode(&mut inodes, 8, b"/");
    note(9, &inodes, &mut ino_off);
    symlink_inode(&mut inodes, 9, b"loop2");
    note(10, &inodes, &mut ino_off);
    symlink_inode(&mut inodes, 10, b"loop");
    note(11, &inodes, &mut ino_off); // /large_dir/sparse
    basic_file_inode(&mut inodes, 11, sparse_start as u32, 2 * BLOCK_SIZE, &[0, 0]);
    note(12, &inodes, &mut ino_off); // /large_dir/zzz
    basic_file_inode(&mut inodes, 12, z_start as u32, 4, &[4 | UNCOMPRESSED_BLOCK]);
    note(15, &inodes, &mut ino_off); // /large_dir/cdev
    inode_header(&mut inodes, 5, 0, 0, 15);
    inodes.extend(1u32.to_le_bytes()); // link_count
    inodes.extend(CDEV_NUMBER.to_le_bytes());
    note(16, &inodes, &mut ino_off); // /large_dir/fifo
    inode_header(&mut inodes, 6, 0, 0, 16);
    inodes.extend(1u32.to_le_bytes()); // link_count
    note(17, &inodes, &mut ino_off); // /large_dir/xlink, ext symlink
    inode_header(&mut inodes, 10, 0, 0, 17);
    inodes.extend(1u32.to_le_bytes()); // link_count
    inodes.extend(6u32.to_le_bytes()); // target_size
    inodes.extend_from_slice(b"sparse");
    inodes.extend(NO_FRAG.to_le_bytes()); // xattr_index trails the target
    // /large_dir's inode comes next; its offset is needed by the root
    // listing below
    note(13, &inodes, &mut ino_off);

    // directory listings
    let mut root_listing = DirListing::new();
    root_listing.fragment(
        1,
        &[
            (b"a", ino_off[1], 1, 2),
            (b"b", ino_off[2], 2, 2),
            (b"large_dir", ino_off[13], 13, 1),
        ],
    );
    let mut large_listing = DirListing::new();
    large_listing.fragment(
        3,
        &[
            (b"cdev", ino_off[15], 15, 5),
            (b"f00", ino_off[3], 3, 2),
            (b"f01", ino_off[4], 4, 2),
            (b"f02", ino_off[5], 5, 2),
            (b"f03", ino_off[6], 6, 2),
            (b"f04", ino_off[7], 7, 2),
        ],
    );
    let first_fragment_len = large_listing.len() as u32;
    large_listing.fragment(
        8,
        &[
            (b"fifo", ino_off[16], 16, 6),
            (b"link", ino_off[8], 8, 3),
            (b"loop", ino_off[9], 9, 3),
            (b"loop2", ino_off[10], 10, 3),
            (b"sparse", ino_off[11], 11, 2),
            (b"xlink", ino_off[17], 17, 3),
            (b"zzz", ino_off[12], 12, 2),
        ],
    );

    // /large_dir inode: ext dir, listing placed after the root listing
    let large_dir_offset = root_listing.len() as u16;
    assert_eq!(ino_off[13] as usize, inodes.len());
    inode_header(&mut inodes, 8, 0, 0, 13);
    inodes.extend(3u32.to_le_bytes()); // link_count
    inodes.extend((large_listing.len() as u32 + 3).to_le_bytes());
    inodes.extend(0u32.to_le_bytes()); // block_index
    inodes.extend(14u32.to_le_bytes()); // parent
    inodes.extend(2u16.to_le_bytes()); // index_count
    inodes.extend(large_dir_offset.to_le_bytes());
    inodes.extend(NO_FRAG.to_le_bytes()); // xattr_index: none
    for (index, name) in [(0u32, b"cdev".as_slice()), (first_fragment_len, b"fifo")] {
        inodes.extend(index.to_le_bytes());
        inodes.extend(0u32.to_le_bytes()); // metablock start
        inodes.extend((name.len() as u32 - 1).to_le_bytes());
        inodes.extend_from_slice(name);
    }

    // root inode: basic dir at listing offset 0, uid idx 0, gid idx 1
    note(14, &inodes, &mut ino_off);
    inode_header(&mut inodes, 1, 0, 1, 14);
    inodes.extend(0u32.to_le_bytes()); // block_index
    inodes.extend(3u32.to_le_bytes()); // link_count
    inodes.extend((root_listing.len() as u16 + 3).to_le_bytes());
    inodes.extend(0u16.to_le_bytes()); // block_offset
    inodes.extend((INODE_COUNT + 1).to_le_bytes()); // root's parent is past the inodes

    let inode_table = image.len() as u64;
    image.extend(metablock(&inodes));

    let dir_table = image.len() as u64;
    let mut dir_payload = root_listing.bytes.clone();
    dir_payload.extend_from_slice(&large_listing.bytes);
    image.extend(metablock(&dir_payload));

    // fragment table: one record, then the pointer array
    let frag_metablock = image.len() as u64;
    let mut frag_payload = Vec::new();
    frag_payload.extend(frag_start.to_le_bytes());
    frag_payload.extend(((B_SIZE as u32 - BLOCK_SIZE) | UNCOMPRESSED_BLOCK).to_le_bytes());
    frag_payload.extend(0u32.to_le_bytes());
    image.extend(metablock(&frag_payload));
    let frag_table = image.len() as u64;
    image.extend(frag_metablock.to_le_bytes());

    // export table
    let export_table = if with_export {
        let export_metablock = image.len() as u64;
        let mut export_payload = Vec::new();
        for n in 1..=INODE_COUNT {
            export_payload.extend(u64::from(ino_off[n as usize]).to_le_bytes());
        }
        image.extend(metablock(&export_payload));
        let export_table = image.len() as u64;
        image.extend(export_metablock.to_le_bytes());
        export_table
    } else {
        NO_SEGMENT
    };

    // id table: uid 2020, gid 202020
    let id_metablock = image.len() as u64;
    let mut id_payload = Vec::new();
    id_payload.extend(2020u32.to_le_bytes());
    id_payload.extend(202020u32.to_le_bytes());
    image.extend(metablock(&id_payload));
    let id_table = image.len() as u64;
    image.extend(id_metablock.to_le_bytes());

    // xattr key/value area: /a inline, /b indirect into the same block
    let kv_start = image.len() as u64;
    let mut kv = Vec::new();
    // entry for /a at offset 0
    kv.extend(0u16.to_le_bytes()); // type user
    kv.extend(3u16.to_le_bytes());
    kv.extend_from_slice(b"foo");
    kv.extend((XATTR_VALUE.len() as u32).to_le_bytes());
    kv.extend_from_slice(XATTR_VALUE);
    let b_key_offset = kv.len() as u64;
    // entry for /b: indirect value, 8-byte reference payload
    kv.extend(0x0100u16.to_le_bytes()); // user | indirect
    kv.extend(3u16.to_le_bytes());
    kv.extend_from_slice(b"bar");
    kv.extend(8u32.to_le_bytes());
    let indirect_at = kv.len() + 8;
    kv.extend((indirect_at as u64).to_le_bytes()); // ref: outer 0, inner
    // the out-of-line value itself
    kv.extend((XATTR_VALUE.len() as u32).to_le_bytes());
    kv.extend_from_slice(XATTR_VALUE);
    image.extend(metablock(&kv));

    // xattr lookup records
    let lookup_metablock = image.len() as u64;
    let mut lookup = Vec::new();
    lookup.extend(0u64.to_le_bytes()); // /a: ref (0, 0)
    lookup.extend(1u32.to_le_bytes());
    lookup.extend(51u32.to_le_bytes());
    lookup.extend(b_key_offset.to_le_bytes()); // /b: ref (0, key offset)
    lookup.extend(1u32.to_le_bytes());
    lookup.extend(63u32.to_le_bytes());
    image.extend(metablock(&lookup));

    // xattr id table header + pointer array
    let xattr_table = image.len() as u64;
    image.extend(kv_start.to_le_bytes());
    image.extend(2u32.to_le_bytes());
    image.extend(0u32.to_le_bytes());
    image.extend(lookup_metablock.to_le_bytes());

    let bytes_used = image.len() as u64;

    // superblock
    let mut superblock = Vec::with_capacity(96);
    superblock.extend(0x73717368u32.to_le_bytes());
    superblock.extend(INODE_COUNT.to_le_bytes());
    superblock.extend(0u32.to_le_bytes()); // mod_time
    superblock.extend(BLOCK_SIZE.to_le_bytes());
    superblock.extend(1u32.to_le_bytes()); // frag_count
    superblock.extend(1u16.to_le_bytes()); // compressor: gzip
    superblock.extend(12u16.to_le_bytes()); // block_log
    let flags: u16 = if with_export { 0x80 } else { 0 };
    superblock.extend(flags.to_le_bytes());
    superblock.extend(2u16.to_le_bytes()); // id_count
    superblock.extend(4u16.to_le_bytes());
    superblock.extend(0u16.to_le_bytes());
    superblock.extend(u64::from(ino_off[14]).to_le_bytes()); // root ref
    superblock.extend(bytes_used.to_le_bytes());
    superblock.extend(id_table.to_le_bytes());
    superblock.extend(xattr_table.to_le_bytes());
    superblock.extend(inode_table.to_le_bytes());
    superblock.extend(dir_table.to_le_bytes());
    superblock.extend(frag_table.to_le_bytes());
    superblock.extend(export_table.to_le_bytes());
    assert_eq!(superblock.len(), 96);
    image[..96].copy_from_slice(&superblock);

    image
}

/// The canonical image behind `offset` junk bytes.
pub fn build_image_at_offset(offset: usize) -> Vec<u8> {
    let mut bytes = vec![0x5a; offset];
    bytes.extend(build_image(true));
    bytes
}
