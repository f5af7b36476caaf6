// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::process::exit;
use structopt::StructOpt;

use mapping::Arguments;

fn main() {
    let args = match Arguments::from_iter_safe(std::env::args_os()) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}", e.message);
            eprint!("{}", mapping::usage());
            exit(1);
        }
    };
    if args.help {
        eprint!("{}", mapping::usage());
        exit(1);
    }
    let job = match args.into_job() {
        Ok(job) => job,
        Err(e) => {
            eprintln!("{}", e);
            eprint!("{}", mapping::usage());
            exit(1);
        }
    };
    if let Err(e) = mapping::execute(job) {
        eprintln!("{:#}", e);
        exit(1);
    }
}
