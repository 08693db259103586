//! Image manager: pull, status, list, remove.

use critest_cri::proto::{Image, ImageFilter, ImageSpec};
use critest_fixtures::Framework;
use critest_runner::assertion::{be_none, contain, equal};
use critest_runner::{Group, expect, expect_ok, step};

/// Image that no registry serves.
const MISSING_IMAGE: &str = "registry.k8s.io/critest/does-not-exist:never";

/// Registers the image manager group.
pub fn register(root: &mut Group<Framework>) {
    root.describe("Image Manager", |g| {
        g.it("public image with tag should be pulled and removed [Conformance]", pulls_by_tag);
        g.it("public image with digest should be pulled and removed [Conformance]", pulls_by_digest);
        g.it("image status should be nil for an absent image [Conformance]", absent_status);
        g.it("listImage should get exactly the pulled image [Conformance]", lists_images);
        g.it("removing an image twice should succeed [Conformance]", removes_twice);
        g.it("image filesystem info should be reported", image_fs_info);
    });
}

fn status(f: &Framework, image: &str) -> Option<Image> {
    expect_ok(f.images().image_status(&ImageSpec::named(image)), "get image status")
}

fn pull_then_remove(f: &mut Framework, image: &str) -> Image {
    let _ = f.pull_image_for_test(image);
    let pulled = status(f, image);
    let Some(found) = pulled else {
        critest_runner::fail(format!("image {image} missing right after pull"));
    };
    f.remove_image_for_test(image);
    expect(status(f, image)).to(be_none());
    found
}

fn pulls_by_tag(f: &mut Framework) {
    let image = f.default_image().to_string();
    let found = pull_then_remove(f, &image);
    expect(&found.repo_tags).to(contain(image));
}

fn pulls_by_digest(f: &mut Framework) {
    let image = f.default_image().to_string();
    let _ = f.pull_image_for_test(&image);
    let digest = status(f, &image)
        .and_then(|i| i.repo_digests.into_iter().next())
        .unwrap_or_default();
    if digest.is_empty() {
        critest_runner::skip("runtime reports no repo digest for the default image");
    }
    step(format!("pull {digest} by digest"));
    f.remove_image_for_test(&image);
    let found = pull_then_remove(f, &digest);
    expect(&found.repo_digests).to(contain(digest));
}

fn absent_status(f: &mut Framework) {
    expect(status(f, MISSING_IMAGE)).to(be_none());
}

fn lists_images(f: &mut Framework) {
    let image = f.default_image().to_string();
    let _ = f.pull_image_for_test(&image);
    let filter = ImageFilter {
        image: Some(ImageSpec::named(image.clone())),
    };
    let images = expect_ok(f.images().list_images(Some(filter)), "list images");
    let tags: Vec<String> = images.into_iter().flat_map(|i| i.repo_tags).collect();
    expect(&tags).to(contain(image));
}

fn removes_twice(f: &mut Framework) {
    let image = f.web_server_image().to_string();
    let _ = f.pull_image_for_test(&image);
    f.remove_image_for_test(&image);
    f.remove_image_for_test(&image);
    expect(status(f, &image)).to(be_none());
}

fn image_fs_info(f: &mut Framework) {
    let info = expect_ok(f.images().image_fs_info(), "get image filesystem info");
    expect(info.image_filesystems.is_empty())
        .with_context("image filesystems reported")
        .to(equal(false));
}
