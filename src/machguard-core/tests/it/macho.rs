//! Navigator and entitlement extraction over synthetic images.

use proptest::prelude::*;

use machguard_core::entitlements::{self, Entitlements};
use machguard_core::macho::{ImageHeader, MachONavigator, LC_CODE_SIGNATURE};
use machguard_core::ParseError;

use crate::fixtures::{entitlements_xml, fat_image, Image};

#[test]
fn thin_image_is_classified() {
    let data = Image::default().build();
    let mut nav = MachONavigator::from_bytes(&data);
    let header = nav.classify(0).unwrap();
    let thin = header.thin().unwrap();
    assert_eq!(thin.ncmds, 2);
    assert_eq!(thin.first_command_offset(), 32);
}

#[test]
fn code_signature_is_found_and_parsed() {
    let data = Image::default().build();
    let mut nav = MachONavigator::from_bytes(&data);
    let header = nav.classify(0).unwrap();
    let location = nav.find_code_signature(&header).unwrap();
    let container = nav.parse_super_blob(&header, location.file_offset).unwrap();
    assert_eq!(container.entries.len(), 2);
    assert!(container.entitlements_offset().is_some());
    assert_eq!(container.length, location.size);
}

#[test]
fn text_section_is_located() {
    let image = Image::with_text(b"\x00\x01\x02\x03\x04\x05\x06\x07\x08");
    let data = image.build();
    let mut nav = MachONavigator::from_bytes(&data);
    let header = nav.classify(0).unwrap();
    let section = nav.find_section(&header, "__TEXT", "__text").unwrap().unwrap();
    assert_eq!(section.size, 9);
    let start = section.offset as usize;
    assert_eq!(&data[start..start + 9], &image.text[..]);
    assert!(nav.find_section(&header, "__DATA", "__data").unwrap().is_none());
}

#[test]
fn unsigned_image_reports_examined_commands() {
    let image = Image {
        signed: false,
        filler: 2,
        ..Image::default()
    };
    let data = image.build();
    let mut nav = MachONavigator::from_bytes(&data);
    let header = nav.classify(0).unwrap();
    let err = nav.find_code_signature(&header).unwrap_err();
    assert!(matches!(err, ParseError::CodeSignatureCommandMissing { examined: 3 }));
    assert!(err.is_missing_signature());
}

#[test]
fn truncated_image_is_an_error() {
    let data = Image::default().build();
    let mut nav = MachONavigator::from_bytes(&data[..40]);
    let header = nav.classify(0).unwrap();
    assert!(nav.find_code_signature(&header).is_err());
}

#[test]
fn entitlements_read_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let payload = entitlements_xml(&[("get-task-allow".to_string(), true)]);
    let path = Image::with_entitlements(&payload).write_to(dir.path(), "App");
    let found = entitlements::read_from_path(&path).unwrap();
    assert_eq!(found.len(), 1);
    assert!(found.get_task_allow());
}

#[test]
fn missing_binary_cannot_be_opened() {
    let dir = tempfile::tempdir().unwrap();
    let err = entitlements::read_from_path(dir.path().join("absent")).unwrap_err();
    assert!(matches!(err, ParseError::CannotOpenBinary { .. }));
}

#[test]
fn image_without_entitlements_blob_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let image = Image {
        entitlements: None,
        ..Image::default()
    };
    let path = image.write_to(dir.path(), "App");
    assert!(matches!(
        entitlements::read_from_path(&path),
        Err(ParseError::SignatureReadingError { .. })
    ));
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 32,
        max_shrink_iters: 200,
        ..ProptestConfig::default()
    })]

    /// Every declared key survives embedding and extraction.
    #[test]
    fn entitlements_round_trip(
        entries in prop::collection::btree_map("[a-z][a-z0-9.-]{0,24}", any::<bool>(), 0..8)
    ) {
        let pairs: Vec<(String, bool)> = entries.clone().into_iter().collect();
        let data = Image::with_entitlements(&entitlements_xml(&pairs)).build();
        let mut nav = MachONavigator::from_bytes(&data);
        let header = nav.classify(0).unwrap();
        let location = nav.find_code_signature(&header).unwrap();
        let container = nav.parse_super_blob(&header, location.file_offset).unwrap();
        let found = entitlements::extract_from_container(&mut nav, &container);

        prop_assert_eq!(found.len(), entries.len());
        for (key, value) in &entries {
            prop_assert_eq!(found.get(key).and_then(plist::Value::as_boolean), Some(*value));
        }
    }

    /// Without `LC_CODE_SIGNATURE` the search visits exactly `ncmds` commands.
    #[test]
    fn signature_search_exhausts_declared_commands(filler in 0u32..6) {
        let image = Image { signed: false, filler, ..Image::default() };
        let data = image.build();
        let mut nav = MachONavigator::from_bytes(&data);
        let header = nav.classify(0).unwrap();

        let mut visited = 0u32;
        let result = nav.find_code_signature_with(&header, |_| visited += 1);
        prop_assert!(result.is_err());
        prop_assert_eq!(visited, image.ncmds());
    }

    /// With `LC_CODE_SIGNATURE` last, the search stops on it.
    #[test]
    fn signature_search_stops_on_match(filler in 0u32..6) {
        let image = Image { filler, ..Image::default() };
        let data = image.build();
        let mut nav = MachONavigator::from_bytes(&data);
        let header = nav.classify(0).unwrap();

        let mut last = 0u32;
        let mut visited = 0u32;
        nav.find_code_signature_with(&header, |command| {
            visited += 1;
            last = command.cmd;
        }).unwrap();
        prop_assert_eq!(visited, image.ncmds());
        prop_assert_eq!(last, LC_CODE_SIGNATURE);
    }

    /// Fat containers are classified but never sliced.
    #[test]
    fn fat_images_are_rejected(nfat_arch in 1u32..8) {
        let data = fat_image(nfat_arch);
        let mut nav = MachONavigator::from_bytes(&data);
        let header = nav.classify(0).unwrap();
        prop_assert_eq!(header, ImageHeader::Fat { nfat_arch });
        let err = nav.find_code_signature(&header).unwrap_err();
        prop_assert!(err.is_fat());
    }

    /// A corrupt entitlements payload decodes as the empty set.
    #[test]
    fn corrupt_entitlements_are_empty(garbage in prop::collection::vec(any::<u8>(), 0..64)) {
        // Not a property list in any encoding.
        let mut payload = b"\x00garbage".to_vec();
        payload.extend_from_slice(&garbage);
        let data = Image::with_entitlements(&payload).build();
        let mut nav = MachONavigator::from_bytes(&data);
        let header = nav.classify(0).unwrap();
        let location = nav.find_code_signature(&header).unwrap();
        let container = nav.parse_super_blob(&header, location.file_offset).unwrap();
        let found = entitlements::extract_from_container(&mut nav, &container);
        prop_assert_eq!(found, Entitlements::EMPTY);
    }
}
