//! Listings, the directory cache and remote globbing over a live session.

mod common;

use common::MockServer;
use ftpkit_core::{exclude_dotdirs, FtpErrorKind, ListingDialect, RemoteFile};

async fn pub_server() -> MockServer {
    let server = MockServer::start().await;
    server.add_dir("/pub");
    server.add_dir("/pub/sub");
    server.add_file("/pub/a.txt", b"aaaa");
    server.add_file("/pub/b.TXT", b"bb");
    server.add_file("/pub/readme", b"read me");
    server
}

#[tokio::test]
async fn directory_listing_is_parsed_and_cached() {
    let server = pub_server().await;
    let mut s = server.session().await;

    let dir = s.get_directory("/pub").await.unwrap();
    assert_eq!(dir.path, "/pub");
    let mut names: Vec<&str> = dir.files.iter().map(RemoteFile::name).collect();
    names.sort_unstable();
    assert_eq!(names, ["a.txt", "b.TXT", "readme", "sub"]);
    assert_eq!(dir.total_size(), 4 + 2 + 7 + 4096);

    // MLSD was refused once and not tried again
    assert!(!s.features().mlsd);
    assert_eq!(s.dialect(), ListingDialect::Unix);
    assert_eq!(server.count("MLSD"), 1);
    assert_eq!(server.count("LIST"), 1);
    // listed from inside the directory, then back
    assert!(server.commands().contains(&"CWD /pub".to_string()));
    assert_eq!(s.curdir(), "/");

    s.get_directory("/pub/").await.unwrap();
    assert_eq!(server.count("LIST"), 1);
}

#[tokio::test]
async fn get_file_reads_the_containing_directory() {
    let server = pub_server().await;
    let mut s = server.session().await;

    let f = s.get_file("/pub/readme").await.unwrap().unwrap();
    assert_eq!(f.size, Some(7));
    assert!(f.is_regular());
    let d = s.get_file("/pub/sub").await.unwrap().unwrap();
    assert_eq!(s.maybe_isdir(&d), Some(true));
    assert!(s.get_file("/pub/ghost").await.unwrap().is_none());
    // one listing served all three lookups
    assert_eq!(server.count("LIST"), 1);
}

#[tokio::test]
async fn glob_matches_case_sensitively() {
    let server = pub_server().await;
    let mut s = server.session().await;

    let mut found = Vec::new();
    let n = s
        .glob("/pub/*.txt", false, false, &mut found, None)
        .await
        .unwrap();
    assert_eq!(n, 1);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].path, "/pub/a.txt");
}

#[tokio::test]
async fn glob_relative_to_current_directory() {
    let server = pub_server().await;
    let mut s = server.session().await;
    s.chdir("/pub").await.unwrap();

    let mut found = Vec::new();
    s.glob("*", false, false, &mut found, Some(&exclude_dotdirs))
        .await
        .unwrap();
    assert_eq!(found.len(), 4);

    // already present entries are not repeated, so nothing new matched
    let err = s
        .glob("read*", false, true, &mut found, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, FtpErrorKind::NotFound);
    assert_eq!(found.len(), 4);
}

#[tokio::test]
async fn glob_exclude_filter() {
    let server = pub_server().await;
    let mut s = server.session().await;

    let skip_dirs = |f: &RemoteFile| f.is_dir();
    let mut found = Vec::new();
    s.glob("/pub/*", false, false, &mut found, Some(&skip_dirs))
        .await
        .unwrap();
    assert!(found.iter().all(|f| !f.is_dir()));
    assert_eq!(found.len(), 3);
}

#[tokio::test]
async fn literal_fallback_for_unlisted_names() {
    let server = pub_server().await;
    let mut s = server.session().await;

    let mut found = Vec::new();
    let n = s
        .glob("/pub/hidden.bin", true, false, &mut found, None)
        .await
        .unwrap();
    assert_eq!(n, 1);
    assert_eq!(found[0].path, "/pub/hidden.bin");
    assert_eq!(found[0].perm, "-rw-r--r--");
    assert_eq!(found[0].size, None);

    let err = s
        .glob("/pub/*.zip", true, false, &mut found, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, FtpErrorKind::NotFound);

    let err = s
        .glob("/pub/hidden.bin", false, false, &mut Vec::new(), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, FtpErrorKind::NotFound);
}

#[tokio::test]
async fn upload_invalidates_listing_after_cycle() {
    let server = pub_server().await;
    let mut s = server.session().await;
    s.get_directory("/pub").await.unwrap();

    let mut body: &[u8] = b"new";
    s.send(
        "/pub/new.txt",
        &mut body,
        ftpkit_core::PutMode::Normal,
        ftpkit_core::TransferType::Binary,
        None,
    )
    .await
    .unwrap();
    s.end_command_cycle();
    assert!(!s.cache().contains("/pub"));

    let mut found = Vec::new();
    s.glob("/pub/new*", false, false, &mut found, None)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(server.count("LIST"), 2);
}
