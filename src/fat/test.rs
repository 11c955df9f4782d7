use hex_literal::hex;

use crate::{fat::*, filesystem::FilesystemKind, Block, BlockIdx, MemoryBlockDevice};

/// 13 Oct 2023, 14:30.
const DATE: u16 = ((2023 - 1980) << 9) | (10 << 5) | 13;
const TIME: u16 = (14 << 11) | (30 << 5);

fn short_entry(name: &[u8; 11], attr: u8, size: u32) -> [u8; 32] {
    let mut entry = [0u8; 32];
    entry[0..11].copy_from_slice(name);
    entry[11] = attr;
    entry[22..24].copy_from_slice(&TIME.to_le_bytes());
    entry[24..26].copy_from_slice(&DATE.to_le_bytes());
    entry[28..32].copy_from_slice(&size.to_le_bytes());
    entry
}

fn put(sector: &mut Block, slot: usize, entry: &[u8; 32]) {
    sector[slot * 32..(slot + 1) * 32].copy_from_slice(entry);
}

#[test]
fn short_name_rendering() {
    let raw = ShortNameRaw::new(b"HELLO   TXT");
    assert_eq!(raw.to_short_name().as_str(), "HELLO.TXT");
    let raw = ShortNameRaw::new(b"DOCS       ");
    assert_eq!(raw.to_short_name().as_str(), "DOCS");
    let raw = ShortNameRaw::new(b"A       B  ");
    assert_eq!(raw.to_short_name().as_str(), "A.B");
    let raw = ShortNameRaw::new(b"\xC9T\xC9     TXT");
    assert_eq!(raw.to_short_name().as_str(), "?T?.TXT");
}

#[test]
fn file_row() {
    let bytes = short_entry(b"HELLO   TXT", 0x20, 1234);
    let entry = DirEntry::new(&DirEntryRaw::new(&bytes), None);
    assert_eq!(entry.display_name(), "HELLO.TXT");
    assert_eq!(
        format!("{}", entry),
        "-rw-rw-rw-  1       1234 Oct 13 14:30 HELLO.TXT"
    );
}

#[test]
fn directory_and_read_only_rows() {
    let bytes = short_entry(b"DOCS       ", 0x10, 0);
    let entry = DirEntry::new(&DirEntryRaw::new(&bytes), None);
    assert!(entry.is_dir());
    assert_eq!(
        format!("{}", entry),
        "drwxrwxrwx  1      <DIR> Oct 13 14:30 DOCS"
    );

    let mut bytes = short_entry(b"RO      BIN", 0x01, 7);
    bytes[24..26].copy_from_slice(&0u16.to_le_bytes());
    let entry = DirEntry::new(&DirEntryRaw::new(&bytes), None);
    assert_eq!(
        format!("{}", entry),
        "-r--r--r--  1          7 ??? ?? ??:?? RO.BIN"
    );
}

#[test]
fn long_name_row_shows_short_name() {
    let bytes = short_entry(b"ALONGF~1TXT", 0x20, 0);
    let entry = DirEntry::new(&DirEntryRaw::new(&bytes), Some("A long file name.txt"));
    assert_eq!(entry.display_name(), "A long file name.txt");
    assert!(format!("{}", entry).ends_with(" A long file name.txt [ALONGF~1.TXT]"));

    // Same name both ways: no bracketed short name.
    let bytes = short_entry(b"README     ", 0x20, 0);
    let entry = DirEntry::new(&DirEntryRaw::new(&bytes), Some("README"));
    assert!(format!("{}", entry).ends_with(" README"));

    let entry = DirEntry::new(&DirEntryRaw::new(&[0x20u8; 32]), Some(""));
    assert_eq!(entry.long_name(), None);
}

#[test]
fn iteration_stops_at_end_marker() {
    let mut sector = Block::new();
    put(&mut sector, 0, &short_entry(b"ONE     TXT", 0x20, 1));
    let mut deleted = short_entry(b"GONE    TXT", 0x20, 1);
    deleted[0] = 0xE5;
    put(&mut sector, 1, &deleted);
    put(&mut sector, 2, &short_entry(b"TWO     TXT", 0x20, 2));
    // Slot 3 is left zero, so slot 4 is never reached.
    put(&mut sector, 4, &short_entry(b"HIDDEN  TXT", 0x20, 3));

    let mut iter = DirIter::new(&sector);
    let names: Vec<_> = (&mut iter)
        .map(|e| std::string::String::from(e.display_name()))
        .collect();
    assert_eq!(names, ["ONE.TXT", "TWO.TXT"]);
    assert_eq!(iter.slots_read(), 4);
    assert!(iter.next().is_none());
}

#[test]
fn only_exact_long_name_attribute_is_a_fragment() {
    let mut sector = Block::new();
    put(&mut sector, 0, &short_entry(b"ODD     BIN", 0x4F, 5));
    let mut fragment = [0xFFu8; 32];
    fragment[0] = 0x41;
    fragment[11] = 0x0F;
    put(&mut sector, 1, &fragment);
    put(&mut sector, 2, &short_entry(b"PLAIN   TXT", 0x20, 10));

    let entries: Vec<_> = DirIter::new(&sector).collect();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].display_name(), "ODD.BIN");
    assert_eq!(entries[0].file_size(), 5);
    assert_eq!(entries[1].short_name(), "PLAIN.TXT");
}

#[test]
fn full_sector_has_sixteen_rows() {
    let mut sector = Block::new();
    for slot in 0..16 {
        put(&mut sector, slot, &short_entry(b"FILE    DAT", 0x20, 10));
    }
    assert_eq!(DirIter::new(&sector).count(), 16);
}

#[cfg(feature = "lfn")]
#[test]
fn long_name_from_two_fragments() {
    let mut sector = Block::new();
    // "A long file name.txt": fragment 2 (last, 0x40 set) then fragment 1.
    put(
        &mut sector,
        0,
        &hex!(
            "42 61 00 6D 00 65 00 2E 00 74 00 0F 00 3C 78 00
             74 00 00 00 FF FF FF FF FF FF 00 00 FF FF FF FF"
        ),
    );
    put(
        &mut sector,
        1,
        &hex!(
            "01 41 00 20 00 6C 00 6F 00 6E 00 0F 00 3C 67 00
             20 00 66 00 69 00 6C 00 65 00 00 00 20 00 6E 00"
        ),
    );
    put(&mut sector, 2, &short_entry(b"ALONGF~1TXT", 0x20, 2048));
    put(&mut sector, 3, &short_entry(b"PLAIN   TXT", 0x20, 10));

    let entries: Vec<_> = DirIter::new(&sector).collect();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].display_name(), "A long file name.txt");
    assert_eq!(entries[0].short_name(), "ALONGF~1.TXT");
    // The pending name is cleared after the entry it belongs to.
    assert_eq!(entries[1].long_name(), None);
    assert_eq!(entries[1].display_name(), "PLAIN.TXT");
}

#[cfg(not(feature = "lfn"))]
#[test]
fn long_name_fragments_are_skipped() {
    let mut sector = Block::new();
    let mut fragment = [0xFFu8; 32];
    fragment[0] = 0x41;
    fragment[11] = 0x0F;
    put(&mut sector, 0, &fragment);
    put(&mut sector, 1, &short_entry(b"ALONGF~1TXT", 0x20, 2048));
    let entries: Vec<_> = DirIter::new(&sector).collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].display_name(), "ALONGF~1.TXT");
}

#[test]
fn listing_totals() {
    let mut sector = Block::new();
    put(&mut sector, 0, &short_entry(b"DOCS       ", 0x10, 4096));
    put(&mut sector, 1, &short_entry(b"A       BIN", 0x20, 2048));
    put(&mut sector, 2, &short_entry(b"B       BIN", 0x20, 1536));
    let sector = DirectorySector::new(BlockIdx(0), sector);

    let mut out = std::string::String::new();
    let summary = sector.write_listing(&mut out, "  ").unwrap();
    assert_eq!(summary.entries, 3);
    assert_eq!(summary.total_bytes, 3584);

    let lines: Vec<_> = out.lines().collect();
    assert_eq!(lines.len(), 5);
    assert!(lines[0].starts_with("  drwxrwxrwx"));
    assert_eq!(lines[3], "  total 3");
    assert_eq!(lines[4], "  3 files and directories");
}

#[test]
fn empty_listing() {
    let sector = DirectorySector::new(BlockIdx(0), Block::new());
    let mut out = std::string::String::new();
    sector.write_listing(&mut out, "").unwrap();
    assert_eq!(out, "total 0\n0 files and directories\n");
}

#[test]
fn open_volume() {
    let mut memory = vec![0u8; 64 * 512];
    {
        let boot = &mut memory[8 * 512..9 * 512];
        boot[11..24].copy_from_slice(&hex!("00 02 01 01 00 02 10 00 38 00 F8 04 00"));
        boot[54..62].copy_from_slice(b"FAT16   ");
        boot[510] = 0x55;
        boot[511] = 0xAA;
        // FAT at 9, two copies of 4 sectors, root directory at 17.
        let root = &mut memory[17 * 512..18 * 512];
        root[0..32].copy_from_slice(&short_entry(b"HELLO   TXT", 0x20, 12));
    }
    let mut bd = MemoryBlockDevice::new(&mut memory);

    assert!(matches!(
        FatVolume::open(&mut bd, BlockIdx(0)),
        Err(FatError::NotFat(FilesystemKind::Unknown))
    ));
    assert!(matches!(
        FatVolume::open(&mut bd, BlockIdx(100)),
        Err(FatError::DeviceError(_))
    ));

    let mut volume = FatVolume::open(&mut bd, BlockIdx(8)).unwrap();
    assert_eq!(volume.kind(), FilesystemKind::Fat16);
    assert_eq!(volume.geometry().fat_start, BlockIdx(9));
    assert_eq!(volume.geometry().root_dir_start, BlockIdx(17));
    assert_eq!(volume.geometry().root_entries, 16);

    let root = volume.root_directory().unwrap();
    assert_eq!(root.lba(), BlockIdx(17));
    let entries: Vec<_> = root.iter().collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].display_name(), "HELLO.TXT");
    assert_eq!(entries[0].file_size(), 12);
}
