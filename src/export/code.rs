use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error_codes::{CodedError, ErrorCode};
use crate::export::minify::minify;
use crate::gradient::{stops_to_texture_data, GRADIENT_TEXTURE_WIDTH};
use crate::params::{ParamKey, ParamKind, ParameterSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeFormat {
    Wgsl,
    JavaScript,
    TypeScript,
    Html,
}

impl CodeFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Wgsl => "wgsl",
            Self::JavaScript => "js",
            Self::TypeScript => "ts",
            Self::Html => "html",
        }
    }
}

impl fmt::Display for CodeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Wgsl => "wgsl",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Html => "html",
        })
    }
}

impl FromStr for CodeFormat {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "wgsl" => Ok(Self::Wgsl),
            "javascript" | "js" => Ok(Self::JavaScript),
            "typescript" | "ts" => Ok(Self::TypeScript),
            "html" => Ok(Self::Html),
            other => Err(anyhow!(CodedError::usage(
                ErrorCode::UnsupportedFormat,
                format!(
                    "unsupported code format '{other}' (expected wgsl, javascript, typescript or html)"
                )
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeExportOptions {
    pub format: CodeFormat,
    pub minify: bool,
}

impl CodeExportOptions {
    pub fn new(format: CodeFormat) -> Self {
        Self {
            format,
            minify: false,
        }
    }
}

/// Helpers shared by the script formats. `/*@ ... */` holds a TypeScript
/// annotation: kept for TypeScript, dropped for JavaScript.
const RUNTIME_TEMPLATE: &str = r#"const GRADIENT_MODES = ["linear", "radial", "noise"];

function hexToRgb(hex/*@: string*/)/*@: [number, number, number]*/ {
  const value = parseInt(hex.slice(1), 16);
  return [((value >> 16) & 255) / 255, ((value >> 8) & 255) / 255, (value & 255) / 255];
}

// Column-major 4x4 product a * b.
function multiply(a/*@: number[]*/, b/*@: number[]*/)/*@: number[]*/ {
  const out = new Array(16).fill(0);
  for (let col = 0; col < 4; col++) {
    for (let row = 0; row < 4; row++) {
      let sum = 0;
      for (let k = 0; k < 4; k++) {
        sum += a[k * 4 + row] * b[col * 4 + k];
      }
      out[col * 4 + row] = sum;
    }
  }
  return out;
}

function perspective(fovDeg/*@: number*/, aspect/*@: number*/, near/*@: number*/, far/*@: number*/)/*@: number[]*/ {
  const f = 1 / Math.tan((fovDeg * Math.PI) / 360);
  const range = far / (near - far);
  return [f / aspect, 0, 0, 0, 0, f, 0, 0, 0, 0, range, -1, 0, 0, range * near, 0];
}

function dot(a/*@: number[]*/, b/*@: number[]*/)/*@: number*/ {
  return a[0] * b[0] + a[1] * b[1] + a[2] * b[2];
}

function cross(a/*@: number[]*/, b/*@: number[]*/)/*@: number[]*/ {
  return [a[1] * b[2] - a[2] * b[1], a[2] * b[0] - a[0] * b[2], a[0] * b[1] - a[1] * b[0]];
}

function normalize(v/*@: number[]*/)/*@: number[]*/ {
  const length = Math.hypot(v[0], v[1], v[2]) || 1;
  return [v[0] / length, v[1] / length, v[2] / length];
}

function lookAt(eye/*@: number[]*/, target/*@: number[]*/)/*@: number[]*/ {
  const forward = normalize([target[0] - eye[0], target[1] - eye[1], target[2] - eye[2]]);
  let side = cross(forward, [0, 1, 0]);
  if (Math.hypot(side[0], side[1], side[2]) < 1e-6) {
    side = cross(forward, [0, 0, 1]);
  }
  side = normalize(side);
  const up = cross(side, forward);
  return [
    side[0], up[0], -forward[0], 0,
    side[1], up[1], -forward[1], 0,
    side[2], up[2], -forward[2], 0,
    -dot(side, eye), -dot(up, eye), dot(forward, eye), 1,
  ];
}

// Rotation applied in X, then Y, then Z order.
function rotationXYZ(x/*@: number*/, y/*@: number*/, z/*@: number*/)/*@: number[]*/ {
  const sx = Math.sin(x), cx = Math.cos(x);
  const sy = Math.sin(y), cy = Math.cos(y);
  const sz = Math.sin(z), cz = Math.cos(z);
  const rx = [1, 0, 0, 0, 0, cx, sx, 0, 0, -sx, cx, 0, 0, 0, 0, 1];
  const ry = [cy, 0, -sy, 0, 0, 1, 0, 0, sy, 0, cy, 0, 0, 0, 0, 1];
  const rz = [cz, sz, 0, 0, -sz, cz, 0, 0, 0, 0, 1, 0, 0, 0, 0, 1];
  return multiply(rz, multiply(ry, rx));
}

// Packs the 272-byte uniform block declared by the vertex shader.
function packUniforms(params/*@: GradientParams*/, aspect/*@: number*/, time/*@: number*/, useTexture/*@: boolean*/)/*@: Float32Array*/ {
  const eye = [params.cameraPosX, params.cameraPosY, params.cameraPosZ];
  const target = [params.cameraTargetX, params.cameraTargetY, params.cameraTargetZ];
  const data = new Float32Array(68);
  data.set(multiply(perspective(params.cameraFov, aspect, 0.1, 200), lookAt(eye, target)), 0);
  data.set(rotationXYZ(params.rotationX, params.rotationY, params.rotationZ), 16);
  data.set([eye[0], eye[1], eye[2], time], 32);
  data.set([params.lightDirX, params.lightDirY, params.lightDirZ, params.diffuseIntensity], 36);
  data.set([params.ambientIntensity, params.rimLightIntensity, params.gradientShift, GRADIENT_MODES.indexOf(params.gradientMode)], 40);
  data.set([params.normalNoiseScaleX, params.normalNoiseScaleY, params.normalNoiseSpeed, params.normalNoiseStrength], 44);
  data.set([params.colorNoiseScale, params.colorNoiseSpeed, useTexture ? 1 : 0, params.showWireframe ? 1 : 0], 48);
  [params.color1, params.color2, params.color3, params.color4].forEach((hex, index) => {
    const [r, g, b] = hexToRgb(hex);
    data.set([r, g, b, 1], 52 + index * 4);
  });
  return data;
}
"#;

const MESH_BUILDER: &str = r#"// Interleaved position, normal, uv (8 floats per vertex).
function buildMesh(p) {
  const vertices = [];
  const indices = [];
  const grid = (columns, rows, vertex) => {
    const base = vertices.length / 8;
    for (let row = 0; row <= rows; row++) {
      for (let col = 0; col <= columns; col++) {
        vertices.push(...vertex(col / columns, row / rows));
      }
    }
    for (let row = 0; row < rows; row++) {
      for (let col = 0; col < columns; col++) {
        const a = base + row * (columns + 1) + col;
        const b = a + columns + 1;
        indices.push(a, b, a + 1, b, b + 1, a + 1);
      }
    }
  };

  if (p.geometryType === "sphere") {
    grid(p.sphereWidthSegments, p.sphereHeightSegments, (u, v) => {
      const phi = u * 2 * Math.PI;
      const theta = v * Math.PI;
      const n = [-Math.cos(phi) * Math.sin(theta), Math.cos(theta), Math.sin(phi) * Math.sin(theta)];
      return [n[0] * p.sphereRadius, n[1] * p.sphereRadius, n[2] * p.sphereRadius, n[0], n[1], n[2], u, 1 - v];
    });
  } else if (p.geometryType === "cube") {
    const half = p.cubeSize / 2;
    const faces = [
      [[1, 0, 0], [0, 0, -1], [0, -1, 0]],
      [[-1, 0, 0], [0, 0, 1], [0, -1, 0]],
      [[0, 1, 0], [1, 0, 0], [0, 0, 1]],
      [[0, -1, 0], [1, 0, 0], [0, 0, -1]],
      [[0, 0, 1], [1, 0, 0], [0, -1, 0]],
      [[0, 0, -1], [-1, 0, 0], [0, -1, 0]],
    ];
    for (const [n, du, dv] of faces) {
      grid(p.cubeSegments, p.cubeSegments, (u, v) => {
        const su = (u - 0.5) * p.cubeSize;
        const sv = (v - 0.5) * p.cubeSize;
        const position = [0, 1, 2].map((i) => n[i] * half + du[i] * su + dv[i] * sv);
        return [...position, n[0], n[1], n[2], u, 1 - v];
      });
    }
  } else {
    grid(p.planeSegments, p.planeSegments, (u, v) => [
      (u - 0.5) * p.planeWidth, (0.5 - v) * p.planeHeight, 0, 0, 0, 1, u, 1 - v,
    ]);
  }
  return { vertices: new Float32Array(vertices), indices: new Uint32Array(indices) };
}
"#;

const WEBGPU_BOOTSTRAP: &str = r#"function gradientTexels() {
  if (GRADIENT_TEXTURE === null) {
    return new Uint8Array(GRADIENT_WIDTH * 4).fill(255);
  }
  return Uint8Array.from(atob(GRADIENT_TEXTURE), (c) => c.charCodeAt(0));
}

async function main() {
  const canvas = document.getElementById("gradient");
  if (!navigator.gpu) {
    document.body.textContent = "WebGPU is not available in this browser.";
    return;
  }
  const adapter = await navigator.gpu.requestAdapter();
  const device = await adapter.requestDevice();
  const context = canvas.getContext("webgpu");
  const format = navigator.gpu.getPreferredCanvasFormat();
  context.configure({ device, format, alphaMode: "premultiplied" });

  const module = device.createShaderModule({ code: SHADER });
  const mesh = buildMesh(PARAMS);
  const vertexBuffer = device.createBuffer({
    size: mesh.vertices.byteLength,
    usage: GPUBufferUsage.VERTEX | GPUBufferUsage.COPY_DST,
  });
  device.queue.writeBuffer(vertexBuffer, 0, mesh.vertices);
  const indexBuffer = device.createBuffer({
    size: mesh.indices.byteLength,
    usage: GPUBufferUsage.INDEX | GPUBufferUsage.COPY_DST,
  });
  device.queue.writeBuffer(indexBuffer, 0, mesh.indices);
  const uniformBuffer = device.createBuffer({
    size: 272,
    usage: GPUBufferUsage.UNIFORM | GPUBufferUsage.COPY_DST,
  });

  const texture = device.createTexture({
    size: [GRADIENT_WIDTH, 1],
    format: "rgba8unorm",
    usage: GPUTextureUsage.TEXTURE_BINDING | GPUTextureUsage.COPY_DST,
  });
  device.queue.writeTexture({ texture }, gradientTexels(), { bytesPerRow: GRADIENT_WIDTH * 4 }, [GRADIENT_WIDTH, 1]);
  const sampler = device.createSampler({ magFilter: "linear", minFilter: "linear" });

  const pipeline = device.createRenderPipeline({
    layout: "auto",
    vertex: {
      module,
      entryPoint: "vs_main",
      buffers: [{
        arrayStride: 32,
        attributes: [
          { shaderLocation: 0, offset: 0, format: "float32x3" },
          { shaderLocation: 1, offset: 12, format: "float32x3" },
          { shaderLocation: 2, offset: 24, format: "float32x2" },
        ],
      }],
    },
    fragment: { module, entryPoint: "fs_main", targets: [{ format }] },
    primitive: { topology: "triangle-list" },
    depthStencil: { format: "depth24plus", depthWriteEnabled: true, depthCompare: "less" },
  });
  const bindGroup = device.createBindGroup({
    layout: pipeline.getBindGroupLayout(0),
    entries: [
      { binding: 0, resource: { buffer: uniformBuffer } },
      { binding: 1, resource: texture.createView() },
      { binding: 2, resource: sampler },
    ],
  });

  const [r, g, b] = hexToRgb(PARAMS.backgroundColor);
  const alpha = PARAMS.backgroundAlpha;
  const clearValue = { r: r * alpha, g: g * alpha, b: b * alpha, a: alpha };
  let depthTexture = null;
  const start = performance.now();

  function frame(now) {
    const width = Math.max(1, Math.floor(canvas.clientWidth * devicePixelRatio));
    const height = Math.max(1, Math.floor(canvas.clientHeight * devicePixelRatio));
    if (!depthTexture || canvas.width !== width || canvas.height !== height) {
      canvas.width = width;
      canvas.height = height;
      depthTexture = device.createTexture({
        size: [width, height],
        format: "depth24plus",
        usage: GPUTextureUsage.RENDER_ATTACHMENT,
      });
    }
    const time = PARAMS.pauseAnimation ? 0 : ((now - start) / 1000) * PARAMS.animationSpeed;
    device.queue.writeBuffer(uniformBuffer, 0, packUniforms(PARAMS, width / height, time, GRADIENT_TEXTURE !== null));

    const encoder = device.createCommandEncoder();
    const pass = encoder.beginRenderPass({
      colorAttachments: [{
        view: context.getCurrentTexture().createView(),
        clearValue,
        loadOp: "clear",
        storeOp: "store",
      }],
      depthStencilAttachment: {
        view: depthTexture.createView(),
        depthClearValue: 1,
        depthLoadOp: "clear",
        depthStoreOp: "store",
      },
    });
    pass.setPipeline(pipeline);
    pass.setBindGroup(0, bindGroup);
    pass.setVertexBuffer(0, vertexBuffer);
    pass.setIndexBuffer(indexBuffer, "uint32");
    pass.drawIndexed(mesh.indices.length);
    pass.end();
    device.queue.submit([encoder.finish()]);
    requestAnimationFrame(frame);
  }
  requestAnimationFrame(frame);
}

main();
"#;

fn annotation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"/\*@(.*?)\*/").expect("annotation regex should compile"))
}

fn runtime(typed: bool) -> String {
    let replacement = if typed { "$1" } else { "" };
    annotation_pattern()
        .replace_all(RUNTIME_TEMPLATE, replacement)
        .into_owned()
}

/// Escapes text for a JavaScript template literal.
fn template_literal(source: &str) -> String {
    let escaped = source
        .replace('\\', "\\\\")
        .replace('`', "\\`")
        .replace("${", "\\${");
    format!("`{escaped}`")
}

fn params_json(params: &ParameterSet) -> Result<String> {
    serde_json::to_string_pretty(params).context("failed to serialize parameters")
}

fn stops_json(params: &ParameterSet) -> Result<String> {
    match params.color_stops() {
        Some(stops) => serde_json::to_string(stops).context("failed to serialize color stops"),
        None => Ok("null".to_owned()),
    }
}

/// Base64 of the baked 256x1 RGBA gradient, or `None` without color stops.
pub fn gradient_texture_base64(params: &ParameterSet) -> Result<Option<String>> {
    params
        .color_stops()
        .map(|stops| {
            stops_to_texture_data(stops, GRADIENT_TEXTURE_WIDTH)
                .map(|data| general_purpose::STANDARD.encode(data))
        })
        .transpose()
}

fn typescript_interface() -> String {
    let mut out = String::from("export interface GradientParams {\n");
    for key in ParamKey::ALL {
        let ty = match key.kind() {
            ParamKind::Number | ParamKind::Integer => "number".to_owned(),
            ParamKind::Bool => "boolean".to_owned(),
            ParamKind::Color => "string".to_owned(),
            ParamKind::Enum(options) => options
                .iter()
                .map(|option| format!("\"{option}\""))
                .collect::<Vec<_>>()
                .join(" | "),
        };
        out.push_str(&format!("  {key}: {ty};\n"));
    }
    out.push_str("  colorStops?: ColorStop[];\n}\n\n");
    out.push_str("export interface ColorStop {\n  position: number;\n  color: string;\n}\n");
    out
}

fn wgsl(params: &ParameterSet, shader: &str) -> Result<String> {
    let mut out = String::from("// Gradient shader exported by gradient-studio.\n");
    out.push_str("// Uniform values for the current configuration:\n");
    for (key, value) in params.iter() {
        out.push_str(&format!("//   {key} = {value}\n"));
    }
    if let Some(stops) = params.color_stops() {
        for stop in stops {
            out.push_str(&format!("//   colorStop {:.3} = {}\n", stop.position, stop.color));
        }
    }
    out.push('\n');
    out.push_str(shader);
    Ok(out)
}

fn script(params: &ParameterSet, shader: &str, typed: bool) -> Result<String> {
    let mut out = String::from("// Gradient shader exported by gradient-studio.\n\n");
    if typed {
        out.push_str(&typescript_interface());
        out.push('\n');
        out.push_str(&format!(
            "export const gradientParams: GradientParams = {};\n\n",
            params_json(params)?
        ));
        out.push_str(&format!(
            "export const colorStops: ColorStop[] | null = {};\n\n",
            stops_json(params)?
        ));
        out.push_str(&format!(
            "export const shaderSource: string = {};\n\n",
            template_literal(shader)
        ));
    } else {
        out.push_str(&format!(
            "export const gradientParams = {};\n\n",
            params_json(params)?
        ));
        out.push_str(&format!("export const colorStops = {};\n\n", stops_json(params)?));
        out.push_str(&format!(
            "export const shaderSource = {};\n\n",
            template_literal(shader)
        ));
    }
    out.push_str(&runtime(typed));
    out.push_str("\nexport { hexToRgb, packUniforms };\n");
    Ok(out)
}

fn html(params: &ParameterSet, shader: &str) -> Result<String> {
    let gradient = match gradient_texture_base64(params)? {
        Some(encoded) => format!(
            "// Color stops baked into a {GRADIENT_TEXTURE_WIDTH}x1 RGBA texture.\nconst GRADIENT_TEXTURE = \"{encoded}\";\n"
        ),
        None => "// No color stops: the shader blends the four palette colors color1..color4.\nconst GRADIENT_TEXTURE = null;\n".to_owned(),
    };

    let mut out = String::new();
    out.push_str("<!doctype html>\n<html lang=\"en\">\n<head>\n");
    out.push_str("<meta charset=\"utf-8\">\n");
    out.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    out.push_str("<title>Gradient Studio export</title>\n");
    out.push_str("<style>\n  html, body { margin: 0; height: 100%; background: transparent; }\n  canvas { display: block; width: 100vw; height: 100vh; }\n</style>\n");
    out.push_str("</head>\n<body>\n<canvas id=\"gradient\"></canvas>\n<script type=\"module\">\n");
    out.push_str(&format!("const PARAMS = {};\n\n", params_json(params)?));
    out.push_str(&format!("const GRADIENT_WIDTH = {GRADIENT_TEXTURE_WIDTH};\n"));
    out.push_str(&gradient);
    out.push('\n');
    out.push_str(&format!("const SHADER = {};\n\n", template_literal(shader)));
    out.push_str(&runtime(false));
    out.push('\n');
    out.push_str(MESH_BUILDER);
    out.push('\n');
    out.push_str(WEBGPU_BOOTSTRAP);
    out.push_str("</script>\n</body>\n</html>\n");
    Ok(out)
}

/// Renders the current configuration as source text. `shader` is the
/// composed WGSL module the engine runs.
pub fn generate_code(format: CodeFormat, params: &ParameterSet, shader: &str) -> Result<String> {
    match format {
        CodeFormat::Wgsl => wgsl(params, shader),
        CodeFormat::JavaScript => script(params, shader, false),
        CodeFormat::TypeScript => script(params, shader, true),
        CodeFormat::Html => html(params, shader),
    }
}

pub fn export_code(
    options: CodeExportOptions,
    params: &ParameterSet,
    shader: &str,
) -> Result<String> {
    let code = generate_code(options.format, params, shader)?;
    Ok(if options.minify { minify(&code) } else { code })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gradient::ColorStop;
    use crate::params::ParamValue;

    const SHADER: &str = "// shader\nfn vs_main() {}\n";

    #[test]
    fn javascript_drops_type_annotations() {
        let code = generate_code(CodeFormat::JavaScript, &ParameterSet::defaults(), SHADER)
            .expect("js");
        assert!(!code.contains("/*@"));
        assert!(!code.contains(": number"));
        assert!(code.contains("function hexToRgb(hex) {"));
    }

    #[test]
    fn typescript_keeps_type_annotations() {
        let code = generate_code(CodeFormat::TypeScript, &ParameterSet::defaults(), SHADER)
            .expect("ts");
        assert!(code.contains("function hexToRgb(hex: string): [number, number, number] {"));
        assert!(code.contains("  geometryType: \"plane\" | \"sphere\" | \"cube\";"));
        assert!(code.contains("  showWireframe: boolean;"));
    }

    #[test]
    fn html_inlines_values_and_palette_fallback() {
        let mut params = ParameterSet::defaults();
        params.set(ParamKey::Color1, ParamValue::text("#123456"));
        let code = generate_code(CodeFormat::Html, &params, SHADER).expect("html");
        assert!(code.contains("\"color1\": \"#123456\""));
        assert!(code.contains("const GRADIENT_TEXTURE = null;"));
        assert!(code.contains("color1..color4"));
    }

    #[test]
    fn html_embeds_gradient_texture_for_color_stops() {
        let mut params = ParameterSet::defaults();
        params.set_color_stops(Some(vec![
            ColorStop::new(0.0, "#000000"),
            ColorStop::new(1.0, "#ffffff"),
        ]));
        let code = generate_code(CodeFormat::Html, &params, SHADER).expect("html");
        let encoded = gradient_texture_base64(&params)
            .expect("texture")
            .expect("stops present");
        assert_eq!(
            general_purpose::STANDARD
                .decode(&encoded)
                .expect("base64")
                .len(),
            GRADIENT_TEXTURE_WIDTH as usize * 4
        );
        assert!(code.contains(&format!("const GRADIENT_TEXTURE = \"{encoded}\";")));
    }

    #[test]
    fn rejects_unknown_formats() {
        let error = "glsl".parse::<CodeFormat>().unwrap_err();
        assert_eq!(
            crate::error_codes::find_coded_error(&error).map(|e| e.code),
            Some(ErrorCode::UnsupportedFormat)
        );
    }

    #[test]
    fn minified_output_keeps_the_shader_literal() {
        let options = CodeExportOptions {
            format: CodeFormat::JavaScript,
            minify: true,
        };
        let code = export_code(options, &ParameterSet::defaults(), SHADER).expect("js");
        assert!(code.contains("`// shader\nfn vs_main() {}\n`"));
        assert!(!code.contains("// Gradient shader exported"));
    }
}
