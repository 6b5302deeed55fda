// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

use vergen::EmitBuilder;

fn main() {
    // Failing to emit build/git info (e.g. building from a source tarball with no `.git`)
    // must not break the build; fall back to the `VERGEN_*` "unknown" defaults.
    if let Err(e) = EmitBuilder::builder()
        .build_timestamp()
        .git_sha(true)
        .git_branch()
        .git_commit_timestamp()
        .emit()
    {
        println!("cargo:warning=failed to emit build info: {e}");
    }
}
