// SPDX-License-Identifier: Apache-2.0

//! On-disk fixtures: a small Wishbone timer written in plain Verilog and the
//! wrapper config that binds it.

use std::path::{Path, PathBuf};

/// Register map (word addressed): 0 ctrl (`[31:16]` prescaler, `[1]` irq
/// enable, `[0]` enable), 1 compare, 2 counter, 3 status (`[1]` match,
/// `[0]` irq pending, write 1 to clear).
pub const WB_TIMER_V: &str = r#"// SPDX-License-Identifier: Apache-2.0
module wb_timer #(
    parameter WIDTH = 32
) (
    input  wire             i_clk,
    input  wire             i_rst_n,
    input  wire             i_wb_cyc,
    input  wire             i_wb_stb,
    input  wire             i_wb_we,
    input  wire [3:0]       i_wb_adr,
    input  wire [WIDTH-1:0] i_wb_dat,
    output reg  [WIDTH-1:0] o_wb_dat,
    output reg              o_wb_ack,
    output wire             o_irq
);
  reg [WIDTH-1:0] ctrl;
  reg [WIDTH-1:0] compare;
  reg [WIDTH-1:0] counter;
  reg [1:0]       status;
  reg [15:0]      prescale;

  wire access = i_wb_cyc & i_wb_stb & ~o_wb_ack;
  wire tick = ctrl[0] & (prescale == ctrl[31:16]);

  assign o_irq = status[0] & ctrl[1];

  always @(posedge i_clk) begin
    if (!i_rst_n) begin
      ctrl     <= 0;
      compare  <= 0;
      counter  <= 0;
      status   <= 0;
      prescale <= 0;
      o_wb_ack <= 1'b0;
      o_wb_dat <= 0;
    end else begin
      o_wb_ack <= access;
      if (ctrl[0])
        prescale <= tick ? 16'd0 : prescale + 16'd1;
      if (tick) begin
        counter <= counter + 1'b1;
        if (counter + 1'b1 == compare)
          status <= 2'b11;
      end
      if (access && i_wb_we) begin
        case (i_wb_adr)
          4'h0: ctrl <= i_wb_dat;
          4'h1: compare <= i_wb_dat;
          4'h2: counter <= i_wb_dat;
          4'h3: status <= status & ~i_wb_dat[1:0];
          default: ;
        endcase
      end
      if (access && !i_wb_we) begin
        case (i_wb_adr)
          4'h0: o_wb_dat <= ctrl;
          4'h1: o_wb_dat <= compare;
          4'h2: o_wb_dat <= counter;
          4'h3: o_wb_dat <= {{(WIDTH-2){1'b0}}, status};
          default: o_wb_dat <= 0;
        endcase
      end
    end
  end
endmodule
"#;

/// Relies entirely on auto-mapping for the bus; the irq pin is explicit.
pub const WB_TIMER_TOML: &str = r#"name = "wb_timer"

[files]
path = "rtl"

[generate]
generator = "verilog"
parameters = { WIDTH = 32 }

[clocks]
sys = "i_clk"

[resets]
sys = "i_rst_n"

[ports.bus]
interface = "wishbone"
params = { addr_width = 4, data_width = "{WIDTH}" }

[pins.irq]
interface = "out(1)"
map = "o_irq"

[driver]
regs_struct = "wb_timer_regs_t"
h_files = ["drivers/wb_timer.h"]
"#;

/// Writes `verilog` to `<dir>/rtl/<module>.v` and `config` to
/// `<dir>/<module>.toml`, returning the config path.
pub fn write_fixture(dir: &Path, module: &str, verilog: &str, config: &str) -> PathBuf {
    let rtl = dir.join("rtl");
    std::fs::create_dir_all(&rtl).expect("create rtl dir");
    std::fs::write(rtl.join(format!("{module}.v")), verilog).expect("write verilog");
    let path = dir.join(format!("{module}.toml"));
    std::fs::write(&path, config).expect("write config");
    path
}

pub fn write_wb_timer(dir: &Path) -> PathBuf {
    write_fixture(dir, "wb_timer", WB_TIMER_V, WB_TIMER_TOML)
}
