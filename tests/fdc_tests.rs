use tracing_subscriber::fmt;
use zxtiming::{
    bank::{RomSet, PAGE_SIZE},
    config::{Architecture, MachineConfig},
    error::DiskError,
    fdc::{DiskController, FdcState, TrdImage, Wd1793, DRQ, INTRQ, SECTOR_SIZE},
    Bus,
};

#[cfg(test)]
#[ctor::ctor]
fn init() {
    let fmt_subscriber = fmt::Subscriber::builder()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(fmt_subscriber)
        .expect("Unable to set global tracing subscriber");
}

const DISK_BYTES: usize = 80 * 2 * 16 * SECTOR_SIZE;

fn patterned_disk() -> TrdImage {
    let mut data = vec![0u8; DISK_BYTES];
    for (i, byte) in data.iter_mut().enumerate() {
        *byte = (i / SECTOR_SIZE) as u8 ^ (i as u8);
    }
    TrdImage::new(data).unwrap()
}

fn controller_with(disk: TrdImage) -> Wd1793 {
    let mut fdc = Wd1793::new();
    fdc.insert_disk(0, disk).unwrap();
    // drive 0, no reset, side 0
    fdc.write_system(0x3C);
    fdc
}

#[test]
fn test_fdc_seek_operations() {
    let mut fdc = controller_with(TrdImage::blank());

    fdc.write_register(3, 10);
    fdc.write_register(0, 0x10);
    assert_eq!(fdc.read_register(1), 10);
    assert_eq!(fdc.read_register(0) & 0x04, 0);

    fdc.write_register(0, 0x00);
    assert_eq!(fdc.read_register(1), 0);
    assert_eq!(fdc.read_register(0) & 0x04, 0x04);
}

#[test]
fn test_fdc_seek_verify_past_last_track() {
    let image = TrdImage::new(vec![0; 40 * 2 * 16 * SECTOR_SIZE]).unwrap();
    let mut fdc = controller_with(image);

    fdc.write_register(3, 50);
    fdc.write_register(0, 0x14);
    assert_eq!(fdc.read_register(0) & 0x10, 0x10);
}

#[test]
fn test_fdc_read_sector() {
    let mut fdc = controller_with(patterned_disk());

    fdc.write_register(2, 3);
    fdc.write_register(0, 0x80);
    assert_eq!(fdc.state(), FdcState::Read);
    assert_eq!(fdc.system_status() & DRQ, DRQ);

    let sector: Vec<u8> = (0..SECTOR_SIZE).map(|_| fdc.read_register(3)).collect();
    let offset = 2 * SECTOR_SIZE;
    let expected: Vec<u8> = (offset..offset + SECTOR_SIZE)
        .map(|i| (i / SECTOR_SIZE) as u8 ^ (i as u8))
        .collect();
    assert_eq!(sector, expected);

    assert_eq!(fdc.state(), FdcState::Idle);
    assert_eq!(fdc.system_status(), INTRQ);
    assert_eq!(fdc.read_register(0) & 0x01, 0);
}

#[test]
fn test_fdc_read_multiple_sectors() {
    let mut fdc = controller_with(patterned_disk());

    fdc.write_register(2, 15);
    fdc.write_register(0, 0x90);
    for _ in 0..2 * SECTOR_SIZE {
        fdc.read_register(3);
    }
    assert_eq!(fdc.read_register(2), 16);
    assert_eq!(fdc.state(), FdcState::Idle);
}

#[test]
fn test_fdc_record_not_found() {
    let mut fdc = controller_with(TrdImage::blank());

    fdc.write_register(2, 17);
    fdc.write_register(0, 0x80);
    assert_eq!(fdc.read_register(0) & 0x10, 0x10);
    assert_eq!(fdc.state(), FdcState::Idle);
}

#[test]
fn test_fdc_write_sector() {
    let mut fdc = controller_with(TrdImage::blank());

    fdc.write_register(2, 2);
    fdc.write_register(0, 0xA0);
    assert_eq!(fdc.state(), FdcState::Write);
    for _ in 0..SECTOR_SIZE {
        fdc.write_register(3, 0x5A);
    }
    assert_eq!(fdc.state(), FdcState::Idle);

    let image = fdc.eject_disk(0).unwrap().unwrap();
    assert!(image.data()[SECTOR_SIZE..2 * SECTOR_SIZE]
        .iter()
        .all(|&b| b == 0x5A));
    assert!(image.data()[..SECTOR_SIZE].iter().all(|&b| b == 0));
    assert!(fdc.eject_disk(0).unwrap().is_none());
}

#[test]
fn test_fdc_write_protected() {
    let mut fdc = controller_with(TrdImage::blank().with_write_protect(true));

    fdc.write_register(2, 1);
    fdc.write_register(0, 0xA0);
    let status = fdc.read_register(0);
    assert_eq!(status & 0x40, 0x40);
    assert_eq!(status & 0x20, 0x20);
    assert_eq!(fdc.state(), FdcState::Idle);
}

#[test]
fn test_fdc_force_interrupt() {
    let mut fdc = controller_with(TrdImage::blank());

    fdc.write_register(0, 0x80);
    assert_eq!(fdc.state(), FdcState::Read);

    // Only force interrupt is accepted while busy.
    fdc.write_register(0, 0x00);
    assert_eq!(fdc.state(), FdcState::Read);

    fdc.write_register(0, 0xD8);
    assert_eq!(fdc.state(), FdcState::Idle);
    assert_eq!(fdc.system_status(), INTRQ);
}

#[test]
fn test_fdc_read_address() {
    let mut fdc = controller_with(TrdImage::blank());

    fdc.write_register(3, 4);
    fdc.write_register(0, 0x10);
    fdc.write_register(0, 0xC0);
    let id: Vec<u8> = (0..6).map(|_| fdc.read_register(3)).collect();
    assert_eq!(id[0], 4);
    assert_eq!(id[3], 0x01);
    assert_eq!(fdc.read_register(2), 4);
}

#[test]
fn test_disk_image_rejects_odd_sizes() {
    assert!(matches!(
        TrdImage::new(vec![0; 3 * SECTOR_SIZE]),
        Err(DiskError::InvalidSize(_))
    ));
    assert!(matches!(
        TrdImage::new(Vec::new()),
        Err(DiskError::InvalidSize(_))
    ));
}

#[test]
fn test_trdos_ports_follow_rom_paging() {
    let rom = vec![0u8; PAGE_SIZE];
    let trdos = vec![0xC9u8; PAGE_SIZE];
    let roms = RomSet::new(&[&rom]).with_trdos(&trdos);
    let mut bus = Bus::new(&MachineConfig::new(Architecture::Spectrum48), &roms).unwrap();
    bus.insert_disk(0, TrdImage::blank()).unwrap();

    bus.fetch_opcode(0x3D2F);
    assert_eq!(bus.memory.peek(0x0000), 0xC9);

    bus.port_out(0xFF, 0x3C);
    bus.port_out(0x7F, 5);
    bus.port_out(0x1F, 0x10);
    assert_eq!(bus.port_in(0xFF), INTRQ);
    assert_eq!(bus.port_in(0x3F), 5);

    bus.fetch_opcode(0x8000);
    assert_eq!(bus.memory.peek(0x0000), 0x00);
    // Unclaimed once TR-DOS is gone: the 48K floats an idle bus.
    assert_eq!(bus.port_in(0x3F), 0xFF);

    assert!(matches!(
        bus.insert_disk(7, TrdImage::blank()),
        Err(DiskError::InvalidDrive(7))
    ));
}
